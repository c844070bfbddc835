//! segue-inspect: run the track analyzer against a local file
//!
//! Prints the acoustic report the AutoMix engine would compute before a
//! transition: loudness, energy structure, outro classification, intro
//! character, BPM, and the spectral fingerprint.

use anyhow::{Context, Result};
use clap::Parser;
use segue_analysis::{analyze_blob, AnalyzeOptions};
use segue_core::TrackAnalysis;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "segue-inspect", about = "Analyze a track like the AutoMix engine would")]
struct Args {
    /// Audio file (mp3, flac, ogg, wav, aac, m4a)
    file: PathBuf,

    /// Skip BPM detection (the most expensive stage)
    #[arg(long)]
    no_bpm: bool,

    /// Emit the full analysis as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let args = Args::parse();
    let bytes = std::fs::read(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;

    let analysis = analyze_blob(
        &bytes,
        AnalyzeOptions {
            analyze_bpm: !args.no_bpm,
        },
    )
    .with_context(|| format!("analyzing {}", args.file.display()))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else {
        print_report(&args.file, &analysis);
    }
    Ok(())
}

fn print_report(file: &PathBuf, analysis: &TrackAnalysis) {
    println!("{}", file.display());
    println!("  duration          {:.1} s", analysis.duration);
    println!("  volume            {}", analysis.volume);

    let e = &analysis.energy;
    println!(
        "  energy            avg {:.2}, trailing silence {:.1} s{}",
        e.average_energy,
        e.trailing_silence,
        if e.is_fade_out { ", fades out" } else { "" }
    );
    println!(
        "  structure         intro settles at {:.1} s, outro begins {:.1} s before the end",
        e.intro_end_offset, e.outro_start_offset
    );

    match &analysis.bpm {
        Some(bpm) => println!(
            "  tempo             {:.1} bpm (confidence {:.2}, {} beats from {:.1} s)",
            bpm.bpm,
            bpm.confidence,
            bpm.beat_grid.len(),
            bpm.analysis_offset
        ),
        None => println!("  tempo             no stable pulse"),
    }

    match &analysis.outro {
        Some(outro) => {
            println!(
                "  outro             {} (confidence {:.2})",
                outro.outro_type, outro.outro_confidence
            );
            println!(
                "  crossfade hint    start {:.1} s, musical content for {:.1} s after",
                outro.suggested_crossfade_start, outro.musical_end_offset
            );
        }
        None => println!("  outro             not classified (track too short)"),
    }

    if let Some(intro) = &analysis.intro {
        println!(
            "  intro             quiet lead-in {:.1} s, build {:.1} s, energy ratio {:.2}",
            intro.quiet_intro_duration, intro.energy_build_duration, intro.intro_energy_ratio
        );
    }

    let bars: String = analysis
        .fingerprint
        .iter()
        .map(|&b| {
            let level = (b * 8.0).min(7.0) as usize;
            char::from_u32(0x2581 + level as u32).unwrap_or(' ')
        })
        .collect();
    println!("  fingerprint       {bars}");
}
