use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{info, warn};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    config::{self, Config},
    domain::track::TrackHeader,
    http::{multipart::UploadLimits, server::HttpServer},
    pipeline::{
        TrackService,
        reader::{CancelToken, StreamOutcome, TrackStream},
        upload::UploadForm,
    },
    storage::SqliteStore,
};

#[derive(Parser)]
#[command(name = "trackvault")]
#[command(version = "0.1")]
#[command(about = "Chunked audio track store")]
pub struct Cli {
    /// Path to the config TOML file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run http server hosting the track store
    Serve,
    /// List stored tracks
    List,
    /// Store a local audio file
    Import {
        file: PathBuf,
        /// Track name, defaults to the file name without extension
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Write a stored track to a local file
    Export { id: String, out: PathBuf },
}

/// Entrypoint for CLI
pub fn run() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .to_str()
        .context("Config path is not valid UTF-8")?;
    let cfg = config::Config::load(config_path)?;

    match cli.command {
        Commands::Serve => {
            let store = Arc::new(SqliteStore::open(&cfg.database)?);
            let service = service_for(store, &cfg);
            let http_server = HttpServer::new(
                service,
                cfg.http.clone(),
                UploadLimits::from(&cfg.upload),
            );

            println!(
                "HTTP server running at http://{}:{}",
                http_server.config.bind_addr, http_server.config.port
            );
            http_server.run();
            Ok(())
        }

        Commands::List => with_service(&cfg, |service| {
            let tracks = service.catalog.list()?;
            println!("Store contains {} tracks", tracks.len());
            for track in &tracks {
                print_track(track);
            }
            Ok(())
        }),

        Commands::Import { file, name } => with_service(&cfg, |service| {
            let header = import(service, &file, name)?;
            println!(
                "Stored {} as {} ({} bytes)",
                file.to_string_lossy(),
                header.id,
                header.length
            );
            Ok(())
        }),

        Commands::Export { id, out } => with_service(&cfg, |service| {
            let bytes = export(service, &id, &out)?;
            println!("Wrote {bytes} bytes to {}", out.to_string_lossy());
            Ok(())
        }),
    }
}

fn service_for(store: Arc<SqliteStore>, cfg: &Config) -> TrackService {
    TrackService::new(store, &cfg.upload, &cfg.catalog, &cfg.streaming)
}

/// Runs one command against a freshly opened store and closes it afterwards.
fn with_service<T>(
    cfg: &Config,
    command: impl FnOnce(&TrackService) -> anyhow::Result<T>,
) -> anyhow::Result<T> {
    let store = Arc::new(SqliteStore::open(&cfg.database)?);
    let service = service_for(Arc::clone(&store), cfg);

    let result = command(&service);
    drop(service);

    match Arc::try_unwrap(store) {
        Ok(store) => store.close()?,
        Err(_) => info!("store still shared, leaving connection open"),
    }
    result
}

fn print_track(track: &TrackHeader) {
    println!("Track: {}", track.id);
    println!("  name: {}", track.name);
    println!(
        "  {} bytes in {} chunks, uploaded {}",
        track.length,
        track.chunk_count(),
        track.upload_date.to_rfc3339()
    );
    for (tag, value) in &track.metadata {
        println!("    - {tag}: {value}");
    }
}

/// Runs the upload pipeline on a local file.
pub fn import(
    service: &TrackService,
    file: &Path,
    name: Option<String>,
) -> anyhow::Result<TrackHeader> {
    let audio = std::fs::read(file)
        .with_context(|| format!("Failed to read {}", file.to_string_lossy()))?;
    let name = name.or_else(|| {
        file.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
    });

    Ok(service.upload.upload(UploadForm {
        name,
        track: Some(audio),
    })?)
}

/// Streams a stored track into `out`, returning the number of bytes written.
///
/// The track is resolved before `out` is created, and a partial file is
/// removed when the stream fails.
pub fn export(service: &TrackService, id: &str, out: &Path) -> anyhow::Result<u64> {
    let mut stream = service.download.open(id)?;

    let result = write_track(service, &mut stream, out);
    if result.is_err() {
        if let Err(e) = std::fs::remove_file(out) {
            warn!("could not remove partial export {}: {e}", out.to_string_lossy());
        }
    }
    result
}

fn write_track(
    service: &TrackService,
    stream: &mut TrackStream,
    out: &Path,
) -> anyhow::Result<u64> {
    let file = File::create(out)
        .with_context(|| format!("Failed to create {}", out.to_string_lossy()))?;
    let mut sink = BufWriter::new(file);
    let id = stream.header().id;

    let outcome = service
        .download
        .stream_to(stream, &mut sink, &CancelToken::default())?;
    sink.flush()?;

    match outcome {
        StreamOutcome::Completed { bytes } => Ok(bytes),
        StreamOutcome::Cancelled { bytes } => {
            anyhow::bail!("export of {id} stopped after {bytes} bytes")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{CatalogConfig, StreamingConfig, UploadConfig},
        pipeline::fixtures::{FaultyStore, memory_store, wav},
    };
    use tempfile::tempdir;

    fn service() -> TrackService {
        let upload = UploadConfig {
            chunk_size_bytes: 512,
            ..UploadConfig::default()
        };
        TrackService::new(
            memory_store(),
            &upload,
            &CatalogConfig::default(),
            &StreamingConfig::default(),
        )
    }

    #[test]
    fn test_import_then_export() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("Morning Song.wav");
        let target = dir.path().join("copy.wav");
        let audio = wav(2000);
        std::fs::write(&source, &audio)?;

        let service = service();
        let header = import(&service, &source, None)?;
        assert_eq!(header.name, "Morning Song");

        let bytes = export(&service, &header.id.to_hex(), &target)?;

        assert_eq!(bytes, audio.len() as u64);
        assert_eq!(std::fs::read(&target)?, audio);
        Ok(())
    }

    #[test]
    fn test_import_with_explicit_name() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("a.wav");
        std::fs::write(&source, wav(100))?;

        let header = import(&service(), &source, Some("Named".to_string()))?;

        assert_eq!(header.name, "Named");
        Ok(())
    }

    #[test]
    fn test_import_missing_file() {
        let dir = tempdir().unwrap();

        assert!(import(&service(), &dir.path().join("absent.wav"), None).is_err());
    }

    #[test]
    fn test_export_unknown_or_malformed_track_creates_no_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let target = dir.path().join("out.wav");
        let service = service();

        let id = crate::domain::id::TrackId::generate().to_hex();
        for raw in [id.as_str(), "not-a-valid-id"] {
            assert!(export(&service, raw, &target).is_err());
            assert!(!target.exists(), "{raw:?} left a file behind");
        }
        Ok(())
    }

    #[test]
    fn test_failed_export_removes_partial_file() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let source = dir.path().join("song.wav");
        let target = dir.path().join("out.wav");
        std::fs::write(&source, wav(2000))?;

        let upload = UploadConfig {
            chunk_size_bytes: 512,
            ..UploadConfig::default()
        };
        let service = TrackService::new(
            Arc::new(FaultyStore::failing_chunk_read_at(3)),
            &upload,
            &CatalogConfig::default(),
            &StreamingConfig::default(),
        );
        let header = import(&service, &source, None)?;

        assert!(export(&service, &header.id.to_hex(), &target).is_err());
        assert!(!target.exists());
        Ok(())
    }

    #[test]
    fn test_with_service_closes_file_store() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let toml_str = format!(
            r#"
version = 1

[database]
in_memory = false
path = "{}"

[http]
bind_addr = "127.0.0.1"
port = 3005
"#,
            dir.path().join("tracks.db").to_string_lossy()
        );
        let cfg: Config = toml::from_str(&toml_str)?;
        let source = dir.path().join("kept.wav");
        std::fs::write(&source, wav(300))?;

        let id = with_service(&cfg, |service| Ok(import(service, &source, None)?.id))?;

        // reopening sees the committed track
        let names = with_service(&cfg, |service| {
            Ok(service
                .catalog
                .list()?
                .into_iter()
                .map(|t| (t.id, t.name))
                .collect::<Vec<_>>())
        })?;
        assert_eq!(names, vec![(id, "kept".to_string())]);
        Ok(())
    }
}
