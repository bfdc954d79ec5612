use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str =
    "  {prefix:>8} {elapsed_precise} │{bar:40.cyan/blue}│ {pos}/{len} • {per_sec} • eta {eta}";

/// Item counter for a long loop. Draws to stderr only when it is a terminal.
pub fn bar(len: u64, prefix: &str) -> ProgressBar {
    let style = ProgressStyle::with_template(TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░");
    let pb = ProgressBar::new(len).with_style(style);
    pb.set_prefix(prefix.to_string());
    pb
}
