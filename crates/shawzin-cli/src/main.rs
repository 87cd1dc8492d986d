//! midi2shawzin: convert MIDI files into Warframe Shawzin strings

mod config;

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shawzin_core::{
    convert_track, ArpOrder, ChordMode, Conversion, ConversionConfig, EncodedTrack, GridDivision,
    KeyProfile, TrackInput,
};
use shawzin_services::{choose_melody_track, read_midi_file, write_chunks};

/// Convert a MIDI file into Warframe Shawzin strings
#[derive(Parser, Debug)]
#[command(name = "midi2shawzin")]
#[command(version)]
struct Cli {
    /// Input MIDI file
    input: PathBuf,

    /// Output directory (default: next to the input file)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Quantization grid, e.g. 16 or 1/16
    #[arg(short, long)]
    quantize: Option<GridDivision>,

    /// Arpeggiate chords instead of keeping their top note
    #[arg(short, long)]
    arpeggiate: bool,

    /// Arpeggio order: up, down or played
    #[arg(long)]
    arp_order: Option<ArpOrder>,

    /// Force the key, e.g. "C major" or "F# dorian"
    #[arg(long)]
    key: Option<String>,

    /// Override the tempo in BPM
    #[arg(short, long)]
    tempo: Option<f64>,

    /// Convert only this track (1-based, counting tracks with notes)
    #[arg(long, conflicts_with = "all_tracks")]
    track: Option<usize>,

    /// Convert every track instead of the most melodic one
    #[arg(long)]
    all_tracks: bool,

    /// Custom scale table (JSON)
    #[arg(long)]
    scales: Option<PathBuf>,

    /// Custom chord table (JSON)
    #[arg(long)]
    chords: Option<PathBuf>,

    /// Settings file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Most notes per output string
    #[arg(long)]
    max_notes: Option<usize>,

    /// Print strings to stdout instead of writing files
    #[arg(short, long)]
    print: bool,

    /// Print the effective settings as TOML and exit
    #[arg(long)]
    dump_config: bool,

    /// Log every lossy decision
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Command-line flags take precedence over the settings file
    fn apply(&self, config: &mut ConversionConfig) {
        if let Some(grid) = self.quantize {
            config.grid = grid;
        }
        if self.arpeggiate {
            config.chords.mode = ChordMode::Arpeggiate;
        }
        if let Some(order) = self.arp_order {
            config.chords.order = order;
        }
        if let Some(key) = &self.key {
            config.key.forced = Some(key.clone());
        }
        if let Some(max) = self.max_notes {
            config.encoder.limits.max_notes = Some(max);
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("shawzin={}", level).parse()?)
                .add_directive(format!("midi2shawzin={}", level).parse()?),
        )
        .init();

    let mut config = config::load_config(cli.config.as_deref())?;
    cli.apply(&mut config);
    if cli.dump_config {
        print!("{}", config::config_to_toml(&config)?);
        return Ok(());
    }

    let tables = config::load_tables(cli.scales.as_deref(), cli.chords.as_deref())?;
    let mut tracks = read_midi_file(&cli.input)
        .with_context(|| format!("reading {}", cli.input.display()))?;
    if tracks.is_empty() {
        bail!("{} contains no playable notes", cli.input.display());
    }
    if let Some(bpm) = cli.tempo {
        for track in &mut tracks {
            track.time_base.tempo_bpm = bpm;
        }
    }

    let selected = select_tracks(&tracks, cli.track, cli.all_tracks)?;
    let stem = cli
        .input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "shawzin".to_string());
    let out_dir = cli
        .output
        .clone()
        .or_else(|| cli.input.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));

    let mut previous_key: Option<KeyProfile> = None;
    for &index in &selected {
        let track = &tracks[index];
        let conversion = convert_track(track, &config, &tables, previous_key.as_ref())
            .with_context(|| format!("converting track '{}'", track.name))?;
        verify_round_trip(&conversion)?;
        report(&conversion, &config, cli.verbose);

        if cli.print {
            for line in conversion.shawzin_strings()? {
                println!("{}", line);
            }
        } else {
            let track_stem = if selected.len() > 1 {
                format!("{}_{}", stem, file_safe(&track.name))
            } else {
                stem.clone()
            };
            write_chunks(&conversion.chunks, &out_dir, &track_stem)?;
        }
        previous_key = Some(conversion.key);
    }
    Ok(())
}

fn select_tracks(tracks: &[TrackInput], track: Option<usize>, all: bool) -> anyhow::Result<Vec<usize>> {
    if all {
        return Ok((0..tracks.len()).collect());
    }
    if let Some(number) = track {
        if number == 0 || number > tracks.len() {
            bail!("track {} does not exist ({} tracks with notes)", number, tracks.len());
        }
        return Ok(vec![number - 1]);
    }
    let best = choose_melody_track(tracks).context("no track with notes")?;
    info!("Using track {} '{}' as the melody", best + 1, tracks[best].name);
    Ok(vec![best])
}

/// Decode every string again and make sure nothing changed
fn verify_round_trip(conversion: &Conversion) -> anyhow::Result<()> {
    for chunk in &conversion.chunks {
        let decoded = EncodedTrack::parse(&chunk.to_shawzin_string()?)?;
        if decoded.notes != chunk.notes {
            bail!("part {} does not decode to the notes it encodes", chunk.chunk_index + 1);
        }
    }
    Ok(())
}

fn report(conversion: &Conversion, config: &ConversionConfig, verbose: bool) {
    let metrics = &conversion.metrics;
    info!("{}", metrics);
    info!("Quality score {:.1}/10", metrics.quality_score(config.chords.mode));
    for hint in metrics.suggestions() {
        warn!("{}", hint);
    }
    if verbose {
        for decision in &conversion.decisions {
            info!("lossy: {}", decision);
        }
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shawzin_core::{NoteEvent, TimeBase};

    fn tracks() -> Vec<TrackInput> {
        let note = |p| NoteEvent::new(p, 0, 480, 100).unwrap();
        vec![
            TrackInput::new("bass", vec![note(36)], TimeBase::default()),
            TrackInput::new("lead", vec![note(72), note(74)], TimeBase::default()),
        ]
    }

    #[test]
    fn test_cli_overrides_settings() {
        let cli = Cli::parse_from([
            "midi2shawzin", "song.mid", "-q", "1/8", "-a", "--arp-order", "down", "--key", "D minor",
            "--max-notes", "200", "-t", "90",
        ]);
        let mut config = ConversionConfig::default();
        cli.apply(&mut config);
        assert_eq!(config.grid.denominator(), 8);
        assert_eq!(config.chords.mode, ChordMode::Arpeggiate);
        assert_eq!(config.chords.order, ArpOrder::Descending);
        assert_eq!(config.key.forced.as_deref(), Some("D minor"));
        assert_eq!(config.encoder.limits.max_notes, Some(200));
        assert_eq!(cli.tempo, Some(90.0));
    }

    #[test]
    fn test_track_selection() {
        let tracks = tracks();
        assert_eq!(select_tracks(&tracks, None, false).unwrap(), vec![1]);
        assert_eq!(select_tracks(&tracks, Some(1), false).unwrap(), vec![0]);
        assert_eq!(select_tracks(&tracks, None, true).unwrap(), vec![0, 1]);
        assert!(select_tracks(&tracks, Some(3), false).is_err());
        assert!(select_tracks(&tracks, Some(0), false).is_err());
    }

    #[test]
    fn test_file_safe_names() {
        assert_eq!(file_safe("Lead Synth #2"), "Lead_Synth__2");
    }
}
