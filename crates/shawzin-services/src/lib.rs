//! shawzin-services: MIDI file input and Shawzin text output

pub mod midi;
pub mod output;

pub use midi::{choose_melody_track, read_midi_bytes, read_midi_file, MidiReadError};
pub use output::{chunk_path, write_chunks, OutputError};
