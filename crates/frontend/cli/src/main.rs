use std::fs::File;
use std::io::{BufWriter, Write};

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use sha2::{Digest, Sha256};

use coinop_core::types::Frame;
use coinop_testboard::{Testboard, TestboardRoms};

/// Headless runner: advances the test board a number of frames and prints
/// a digest of the final frame for regression comparison.
#[derive(Parser)]
struct Args {
    /// Number of frames to run
    #[arg(long, default_value_t = 60)]
    frames: u32,

    /// Write the final frame to this file as PNG
    #[arg(long)]
    dump_png: Option<String>,

    /// Run with the screen flipped (cocktail player 2 orientation)
    #[arg(long, default_value_t = false)]
    flip: bool,

    /// Dump the machine save-state to this file as JSON
    #[arg(long)]
    save: Option<String>,

    /// Suppress everything except the digest line
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut board = Testboard::new(TestboardRoms::demo())?;
    board
        .machine_mut()
        .renderer_mut()
        .set_flip_screen(args.flip);

    for fnum in 1..=args.frames {
        board.run_frame()?;
        info!("frame {fnum} done");
    }

    let frame = board.frame();
    if !args.quiet {
        println!(
            "{}x{} after {} frame(s)",
            frame.width, frame.height, args.frames
        );
    }
    println!("sha256 {}", frame_digest(&frame.pixels));

    if let Some(path) = &args.dump_png {
        write_png(path, frame).with_context(|| format!("writing {path}"))?;
        if !args.quiet {
            println!("wrote {path}");
        }
    }

    if let Some(path) = &args.save {
        let state = board.save_state();
        let mut f = File::create(path)?;
        write!(f, "{}", serde_json::to_string_pretty(&state)?)?;
        if !args.quiet {
            println!("wrote {path}");
        }
    }

    Ok(())
}

fn frame_digest(pixels: &[u32]) -> String {
    let mut hasher = Sha256::new();
    for px in pixels {
        hasher.update(px.to_be_bytes());
    }
    format!("{:x}", hasher.finalize())
}

fn write_png(path: &str, frame: &Frame) -> Result<()> {
    let file = File::create(path)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), frame.width, frame.height);
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;

    let mut rgba = Vec::with_capacity(frame.pixels.len() * 4);
    for px in &frame.pixels {
        let [a, r, g, b] = px.to_be_bytes();
        rgba.extend_from_slice(&[r, g, b, a]);
    }
    writer.write_image_data(&rgba)?;
    Ok(())
}
