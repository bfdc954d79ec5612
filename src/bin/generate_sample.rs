//! Write a small synthetic HAM10000-shaped dataset: a metadata CSV plus JPEG
//! images split over two `HAM10000_images_part_N` folders.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use image::{Rgb, RgbImage};
use lesion_prep::{LesionClass, NUM_CLASSES};
use log::info;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

#[derive(Parser, Debug)]
#[command(name = "generate-sample", about = "Generate a synthetic HAM10000-like dataset")]
struct Args {
    /// Output dataset directory.
    #[arg(long, default_value = "dataset")]
    out: PathBuf,
    /// Images per class, in class-index order (nv,mel,bkl,bcc,akiec,vasc,df).
    #[arg(long, value_delimiter = ',', default_value = "60,12,10,5,3,2,1")]
    per_class: Vec<usize>,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value_t = 80)]
    width: u32,
    #[arg(long, default_value_t = 60)]
    height: u32,
    /// Leave the age cell empty on every k-th row (0 = never).
    #[arg(long, default_value_t = 7)]
    missing_age_every: usize,
    /// Extra metadata rows whose image file is never written.
    #[arg(long, default_value_t = 0)]
    orphan_rows: usize,
}

fn gaussian(d2: f32, sigma: f32) -> f32 {
    (-d2 / (2.0 * sigma * sigma)).exp()
}

/// Skin-toned background with a class-tinted lesion blob.
fn lesion_image(class: LesionClass, width: u32, height: u32, rng: &mut ChaCha8Rng) -> RgbImage {
    let tint: [f32; 3] = match class {
        LesionClass::Nv => [120.0, 70.0, 50.0],
        LesionClass::Mel => [40.0, 25.0, 20.0],
        LesionClass::Bkl => [150.0, 110.0, 70.0],
        LesionClass::Bcc => [200.0, 140.0, 150.0],
        LesionClass::Akiec => [190.0, 90.0, 80.0],
        LesionClass::Vasc => [170.0, 30.0, 60.0],
        LesionClass::Df => [130.0, 90.0, 90.0],
    };
    let skin = [225.0f32, 180.0, 160.0];
    let cx = width as f32 * rng.random_range(0.35..0.65);
    let cy = height as f32 * rng.random_range(0.35..0.65);
    let sigma = width.min(height) as f32 * rng.random_range(0.12..0.25);

    RgbImage::from_fn(width, height, |x, y| {
        let d2 = (x as f32 - cx).powi(2) + (y as f32 - cy).powi(2);
        let a = gaussian(d2, sigma);
        let noise = rng.random_range(-6.0..6.0);
        let px = |c: usize| (skin[c] * (1.0 - a) + tint[c] * a + noise).clamp(0.0, 255.0) as u8;
        Rgb([px(0), px(1), px(2)])
    })
}

fn write_row(
    writer: &mut csv::Writer<fs::File>,
    rng: &mut ChaCha8Rng,
    args: &Args,
    row_id: usize,
    class: LesionClass,
) -> Result<()> {
    const SEXES: [&str; 2] = ["male", "female"];
    const SITES: [&str; 5] = ["back", "lower extremity", "trunk", "face", "scalp"];

    let age = if args.missing_age_every > 0 && row_id % args.missing_age_every == 0 {
        String::new()
    } else {
        format!("{:.1}", (rng.random_range(5..17) * 5) as f32)
    };
    let dx_type = if rng.random_bool(0.5) { "histo" } else { "follow_up" };
    writer.write_record([
        format!("HAM_{row_id:07}"),
        format!("ISIC_{row_id:07}"),
        class.code().to_string(),
        dx_type.to_string(),
        age,
        SEXES[rng.random_range(0..SEXES.len())].to_string(),
        SITES[rng.random_range(0..SITES.len())].to_string(),
    ])?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.per_class.len() != NUM_CLASSES {
        bail!(
            "--per-class needs {NUM_CLASSES} counts, got {}",
            args.per_class.len()
        );
    }

    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let parts = [
        args.out.join("HAM10000_images_part_1"),
        args.out.join("HAM10000_images_part_2"),
    ];
    for dir in &parts {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    let meta_path = args.out.join("HAM10000_metadata.csv");
    let mut writer = csv::Writer::from_path(&meta_path)
        .with_context(|| format!("creating {}", meta_path.display()))?;
    writer.write_record(["lesion_id", "image_id", "dx", "dx_type", "age", "sex", "localization"])?;

    let mut row_id = 0usize;
    let mut written = 0usize;
    for (class, &count) in LesionClass::ALL.iter().zip(&args.per_class) {
        for _ in 0..count {
            row_id += 1;
            let image_id = format!("ISIC_{row_id:07}");
            let img = lesion_image(*class, args.width, args.height, &mut rng);
            let path = parts[row_id % 2].join(format!("{image_id}.jpg"));
            img.save(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            written += 1;
            write_row(&mut writer, &mut rng, &args, row_id, *class)?;
        }
    }
    // metadata rows pointing at images that do not exist
    for _ in 0..args.orphan_rows {
        row_id += 1;
        write_row(&mut writer, &mut rng, &args, row_id, LesionClass::Nv)?;
    }
    writer.flush()?;

    info!(
        "wrote {row_id} metadata row(s), {written} image(s) ({}x{}) to {}",
        args.width,
        args.height,
        args.out.display()
    );
    Ok(())
}
