use std::env;

use hls_archiver::parsers::m3u8_parser::{extract_filename, parse_playlist, ParsedPlaylist};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 3 {
        eprintln!("Usage: playlist-preview <playlist-file> <base-url> [max-segments]");
        std::process::exit(1);
    }

    let file_path = args[1].clone();
    let base_url = args[2].clone();
    let max_segments = args
        .get(3)
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(10);

    match tokio::fs::read_to_string(&file_path).await {
        Ok(content) => print_preview(&base_url, parse_playlist(&content, &base_url), max_segments),
        Err(error) => {
            eprintln!("Error: {error}");
            std::process::exit(1);
        }
    }
}

fn print_preview(base_url: &str, playlist: ParsedPlaylist, max_segments: usize) {
    println!("Playlist: {}", extract_filename(base_url));
    println!("Segments: {}", playlist.segments.len());
    match playlist.resolution {
        Some(resolution) => println!("Resolution: {}x{}", resolution.width, resolution.height),
        None => println!("Resolution: unknown"),
    }
    match playlist.duration {
        Some(duration) => println!("Duration: {:.1}s", duration),
        None => println!("Duration: unknown"),
    }
    println!("Segment preview:");

    for (index, segment) in playlist.segments.iter().take(max_segments).enumerate() {
        println!("  {:>4}  {}  ->  {}", index, segment, extract_filename(segment));
    }
    if playlist.segments.len() > max_segments {
        println!("  ... {} more", playlist.segments.len() - max_segments);
    }
}
