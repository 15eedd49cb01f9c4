//! Dump the tag structure of a WebM file
//!
//! Run with: webmdump <file.webm>  (or pipe to stdin: webmdump -)
//!
//! Walks the container with the same incremental tokenizer the relay uses
//! and prints one line per tag. Handy for checking what a producer actually
//! sends before pointing it at the relay.

use std::io::Read;

use webm_relay::ebml::{self, constants, Tag};
use webm_relay::ParseError;

fn tag_name(id: u32) -> &'static str {
    match id {
        constants::VOID => "Void",
        constants::EBML => "EBML",
        constants::SEGMENT => "Segment",
        constants::SEEK_HEAD => "SeekHead",
        constants::INFO => "Info",
        constants::TIMECODE_SCALE => "TimecodeScale",
        constants::DURATION => "Duration",
        constants::TRACKS => "Tracks",
        constants::TRACK_ENTRY => "TrackEntry",
        constants::TRACK_NUMBER => "TrackNumber",
        constants::VIDEO => "Video",
        constants::PIXEL_WIDTH => "PixelWidth",
        constants::PIXEL_HEIGHT => "PixelHeight",
        constants::AUDIO => "Audio",
        constants::CLUSTER => "Cluster",
        constants::TIMECODE => "Timecode",
        constants::PREV_SIZE => "PrevSize",
        constants::SIMPLE_BLOCK => "SimpleBlock",
        constants::BLOCK_GROUP => "BlockGroup",
        constants::BLOCK => "Block",
        constants::REFERENCE_BLOCK => "ReferenceBlock",
        constants::CUES => "Cues",
        constants::CHAPTERS => "Chapters",
        constants::TAGS => "Tags",
        _ => "?",
    }
}

/// Containers worth recursing into for a useful dump
fn is_container(id: u32) -> bool {
    matches!(
        id,
        constants::SEGMENT
            | constants::TRACKS
            | constants::TRACK_ENTRY
            | constants::CLUSTER
            | constants::INFO
            | constants::VIDEO
            | constants::AUDIO
            | constants::BLOCK_GROUP
    )
}

fn print_tag(tag: &Tag, depth: usize) {
    let length = if tag.is_indeterminate() {
        "indeterminate".to_owned()
    } else {
        tag.payload_len.to_string()
    };
    println!(
        "{:indent$}{} (0x{:X}) length={}",
        "",
        tag_name(tag.id),
        tag.id,
        length,
        indent = depth * 2
    );
}

/// Dump one level of siblings; recurse into containers
fn dump(data: &[u8], depth: usize) -> Result<usize, ParseError> {
    let mut off = 0;
    while off < data.len() {
        let Some(tag) = ebml::parse_tag_incomplete(&data[off..])? else {
            break;
        };
        print_tag(&tag, depth);

        if tag.is_indeterminate() {
            // Runs until the next sibling; children simply follow
            off += tag.header_size as usize;
            continue;
        }
        if tag.total_len() > (data.len() - off) as u64 {
            println!("{:indent$}... truncated", "", indent = (depth + 1) * 2);
            break;
        }

        if is_container(tag.id) {
            let start = off + tag.header_size as usize;
            let end = off + tag.total_len() as usize;
            dump(&data[start..end], depth + 1)?;
        }
        off += tag.total_len() as usize;
    }
    Ok(off)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();
    let Some(path) = args.get(1) else {
        eprintln!("Usage: webmdump <file.webm | ->");
        std::process::exit(1);
    };

    let mut data = Vec::new();
    if path == "-" {
        std::io::stdin().read_to_end(&mut data)?;
    } else {
        data = std::fs::read(path)?;
    }

    match dump(&data, 0) {
        Ok(consumed) => {
            if consumed < data.len() {
                eprintln!("{} trailing bytes not parsed", data.len() - consumed);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("parse error: {}", e);
            std::process::exit(1);
        }
    }
}
