// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of notespace.
//
// notespace is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// notespace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with notespace.  If not,
// see <http://www.gnu.org/licenses/>.

//! # notespaced
//!
//! The notespace daemon.
//!
//! # Introduction
//!
//! notespaced serves the notespace API: users upload files, file them under subjects, comment on,
//! rate & bookmark them, and collaborate in shared spaces. It runs in the foreground (in a
//! container, say, or under systemd), logging to stdout or to a log file. On `SIGHUP` it drains
//! in-flight requests, re-reads its configuration, re-opens its log file & re-connects to its
//! datastore; on `SIGTERM` it drains & exits.

use std::{
    fmt::Display,
    fs::OpenOptions,
    future::IntoFuture,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::Duration;
use clap::{Arg, ArgAction, Command, crate_authors, crate_version, value_parser};
use opentelemetry_prometheus_text_exporter::PrometheusExporter;
use serde::Deserialize;
use snafu::prelude::*;
use tokio::{
    net::TcpListener,
    signal::unix::{SignalKind, signal},
    sync::{Notify, mpsc},
};
use tracing::{Level, debug, error, info};
use tracing_subscriber::{
    Layer, Registry,
    filter::EnvFilter,
    fmt::{self, MakeWriter},
    layer::SubscriberExt,
};

use notespace::{
    blobs::{self, BlobStore, FilesystemBlobs, MemoryBlobs},
    memory::InMemory,
    notespace::Notespace,
    peppers::Peppers,
    server::{init_telemetry, make_router},
    signing_keys::SigningKeys,
    storage::Backend as StorageBackend,
    util::Credentials,
};

/// The notespaced application error type
///
/// Note that I do not derive the [Debug] trait for this error. `main()` returns
/// `Result<(), Error>`, and should the `Err` variant be returned, the Rust runtime uses the
/// `Debug` implementation to produce an error message on stderr. The derived implementation is
/// not very readable, so `Debug` is implemented in terms of [Display].
#[derive(Snafu)]
pub enum Error {
    #[snafu(display("Failed to bind to {addr}: {source}"))]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[snafu(display("Blob store at {root:?} is unusable: {source}"))]
    Blobs { root: PathBuf, source: blobs::Error },
    #[snafu(display("Unable to read configuration file {pth:?}: {source}"))]
    ConfigNotFound {
        pth: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Error parsing configuration file {pth:?}: {source}"))]
    ConfigParse {
        pth: PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    EnvFilter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Failed to open the notespace log file: {source}"))]
    LogFile { source: std::io::Error },
    #[snafu(display("Failed to HUP the logfile: {source}"))]
    LogHup {
        source: tokio::sync::mpsc::error::SendError<PathBuf>,
    },
    #[snafu(display("Failed to connect to ScyllaDB: {source}"))]
    Scylla {
        #[snafu(source(from(notespace::scylla::Error, Box::new)))]
        source: Box<notespace::scylla::Error>,
    },
    #[snafu(display("Failed to install a signal handler: {source}"))]
    Signal { source: std::io::Error },
    #[snafu(display("Failed to set the tracing subscriber: {source}"))]
    Subscriber {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to instantiate a Tokio runtime: {source}"))]
    TokioRuntime { source: std::io::Error },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self::Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

const DEFAULT_CONFIG: &str = "/etc/notespace.toml";

/// Logging-related options read from the command line or the environment
struct LogOpts {
    pub plain: bool,
    pub level: Level,
}

impl LogOpts {
    fn new(matches: &clap::ArgMatches) -> LogOpts {
        LogOpts {
            plain: matches.get_flag("plain"),
            level: match (
                matches.get_flag("debug"),
                matches.get_flag("verbose"),
                matches.get_flag("quiet"),
            ) {
                (true, _, _) => Level::TRACE,
                (false, true, _) => Level::DEBUG,
                (false, false, true) => Level::ERROR,
                (_, _, _) => Level::INFO,
            },
        }
    }
}

/// Configuration options read from the CLI (or the environment)
struct CliOpts {
    pub log_opts: LogOpts,
    pub cfg: Option<PathBuf>,
    /// Overrides the configured log file, if any
    pub log_file: Option<PathBuf>,
}

impl CliOpts {
    fn new(matches: clap::ArgMatches) -> CliOpts {
        CliOpts {
            log_opts: LogOpts::new(&matches),
            cfg: matches.get_one::<PathBuf>("config").cloned(),
            log_file: matches.get_one::<PathBuf>("log-file").cloned(),
        }
    }
}

/// notespace datastore configuration
///
/// Application code writes to [StorageBackend]; which implementation backs it is chosen here, at
/// startup.
// Nb that we can only deserialize (i.e. not serialize) due to the presence of secrets in the
// struct
#[derive(Clone, Debug, Deserialize)]
pub enum StorageConfig {
    /// Keep everything in memory; handy for development, but nothing survives a restart
    Memory {},
    /// Use ScyllaDB/CQL interface
    Scylla {
        /// ScyllaDB credentials, if authentication is to be used
        credentials: Option<Credentials>,
        /// ScyllaDB hosts; specify as "host:port"
        hosts: Vec<String>,
        #[serde(default = "default_keyspace")]
        keyspace: String,
        /// Create the keyspace & tables if they don't already exist
        #[serde(rename = "create-schema", default)]
        create_schema: bool,
    },
}

fn default_keyspace() -> String {
    "notespace".to_owned()
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory {}
    }
}

/// Where uploaded file content is kept
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub enum BlobConfig {
    Memory {},
    Filesystem { root: PathBuf },
}

impl Default for BlobConfig {
    fn default() -> Self {
        BlobConfig::Memory {}
    }
}

/// notespace configuration, version one
#[derive(Clone, Debug, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
struct ConfigV1 {
    /// The notespace log file; None means log to stdout
    log_file: Option<PathBuf>,
    /// Local address at which to listen for requests; specify as "address:port"
    public_address: SocketAddr,
    /// The host name under which access tokens are issued
    host: String,
    /// Uploads larger than this many bytes will be refused
    max_upload_bytes: usize,
    storage_config: StorageConfig,
    blob_config: BlobConfig,
    /// Access token lifetime, in seconds
    token_lifetime: u32,
    pepper: Peppers,
    signing_keys: SigningKeys,
}

impl Default for ConfigV1 {
    fn default() -> Self {
        ConfigV1 {
            log_file: None,
            public_address: "0.0.0.0:20690".parse::<SocketAddr>().unwrap(/* known good */),
            host: "localhost".to_owned(),
            max_upload_bytes: 25 * 1024 * 1024,
            storage_config: StorageConfig::default(),
            blob_config: BlobConfig::default(),
            token_lifetime: 3600,
            pepper: Peppers::default(),
            signing_keys: SigningKeys::default(),
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "version")] // tag "internally"
enum Configuration {
    #[serde(rename = "1")]
    V1(ConfigV1),
}

/// Parse the notespace configuration file
///
/// If no file was named & the default doesn't exist, fall back to the default configuration.
fn parse_config(cfg: &Option<PathBuf>) -> Result<ConfigV1> {
    use snafu::IntoError;
    let (pth, defaulted): (PathBuf, bool) = cfg.as_ref().map_or_else(
        || (PathBuf::from_str(DEFAULT_CONFIG).unwrap(/* known good */), true),
        |p| (p.clone(), false),
    );
    match std::fs::read_to_string(&pth) {
        Ok(text) => match toml::from_str::<Configuration>(&text) {
            Ok(Configuration::V1(cfg)) => Ok(cfg),
            Err(err) => Err(ConfigParseSnafu { pth }.into_error(err)),
        },
        Err(err) => {
            if defaulted && err.kind() == io::ErrorKind::NotFound {
                Ok(ConfigV1::default())
            } else {
                Err(ConfigNotFoundSnafu { pth }.into_error(err))
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            logging                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A tracing-compatible, "reopenable" log file
///
/// [MakeWriter] is implemented on `Arc<W>` & `Mutex<W>` for any `W` implementing
/// [std::io::Write], but not on `Arc<Mutex<W>>`. So the [Layer] gets the [LogFile] outright, and
/// we tell it to re-open the file over a side channel in response to `SIGHUP`.
struct LogFile {
    fd: Arc<Mutex<std::fs::File>>,
}

impl LogFile {
    /// Open a file at `pth`; return a [LogFile] instance along with the send side of a channel
    /// the caller can use to close & re-open the file.
    pub fn open(pth: &Path) -> StdResult<(LogFile, mpsc::Sender<PathBuf>), std::io::Error> {
        let (tx, rx) = mpsc::channel::<PathBuf>(1);
        let fd = OpenOptions::new()
            .create(true)
            .append(true)
            .open(pth)
            .map(|fd| Arc::new(Mutex::new(fd)))?;
        tokio::spawn(LogFile::rehup(fd.clone(), rx));
        Ok((LogFile { fd }, tx))
    }
    /// Close & re-open the file
    async fn rehup(fd: Arc<Mutex<std::fs::File>>, mut rx: mpsc::Receiver<PathBuf>) {
        while let Some(ref pbuf) = rx.recv().await {
            match OpenOptions::new().create(true).append(true).open(pbuf) {
                Ok(f) => *fd.lock().unwrap_or_else(PoisonError::into_inner) = f,
                Err(err) => error!("Failed to open {:?} ({}).", pbuf, err),
            }
        }
    }
}

pub struct LogFileWriter<'a>(MutexGuard<'a, std::fs::File>);

impl<'a> MakeWriter<'a> for LogFile {
    type Writer = LogFileWriter<'a>;
    fn make_writer(&'a self) -> Self::Writer {
        LogFileWriter(self.fd.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl io::Write for LogFileWriter<'_> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    #[inline]
    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }

    #[inline]
    fn write_vectored(&mut self, bufs: &[io::IoSlice<'_>]) -> io::Result<usize> {
        self.0.write_vectored(bufs)
    }

    #[inline]
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf)
    }
}

/// Configure notespace logging
///
/// Logs go to `logfile` if one is given, stdout otherwise. If we're logging to file, return the
/// sender side of a channel that can be used to signal the file to close & re-open itself (in
/// response to a `SIGHUP`, presumably).
///
/// This method can only be invoked once (as it, in turn, calls tracing's
/// [set_global_default](tracing::subscriber::set_global_default)).
#[allow(clippy::type_complexity)]
fn configure_logging(
    logopts: &LogOpts,
    logfile: Option<&Path>,
) -> Result<(
    Box<dyn Layer<Registry> + Send + Sync>,
    EnvFilter,
    Option<mpsc::Sender<PathBuf>>,
)> {
    let filter = EnvFilter::builder()
        .with_default_directive(logopts.level.into())
        .from_env()
        .context(EnvFilterSnafu)?;

    //               |  file        |  stdout      |
    //               |--------------+--------------|
    // --plain=false |  json,file   |  json,stdout |
    // --plain=true  |  !json,file  | !json,stdout |
    //
    // `json()` & `with_writer()` produce builders *of different types*; that's why we box them up
    // as `dyn Layer`.
    let mut tx = None;
    let formatter: Box<dyn Layer<Registry> + Send + Sync> = match logfile {
        Some(logfile) => {
            let (log_file, tx_inner) = LogFile::open(logfile).context(LogFileSnafu)?;
            tx = Some(tx_inner);
            if logopts.plain {
                Box::new(
                    fmt::Layer::default()
                        .compact()
                        .with_ansi(false)
                        .with_writer(log_file),
                )
            } else {
                Box::new(
                    fmt::Layer::default()
                        .json()
                        .with_current_span(true)
                        .with_writer(log_file),
                )
            }
        }
        None if logopts.plain => {
            Box::new(fmt::Layer::default().compact().with_writer(io::stdout))
        }
        None => Box::new(
            fmt::Layer::default()
                .json()
                .with_current_span(true)
                .with_writer(io::stdout),
        ),
    };

    Ok((formatter, filter, tx))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           the server                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// In-memory backends outlive any one pass through the `SIGHUP` loop; re-reading configuration
/// shouldn't wipe the data
struct Retained {
    storage: Arc<InMemory>,
    blobs: Arc<MemoryBlobs>,
}

async fn select_storage(
    config: &StorageConfig,
    retained: &Retained,
) -> Result<Arc<dyn StorageBackend + Send + Sync>> {
    match config {
        StorageConfig::Memory {} => Ok(retained.storage.clone()),
        StorageConfig::Scylla {
            credentials,
            hosts,
            keyspace,
            create_schema,
        } => Ok(Arc::new(
            notespace::scylla::Session::new(hosts, credentials, keyspace, *create_schema)
                .await
                .context(ScyllaSnafu)?,
        )),
    }
}

async fn select_blobs(
    config: &BlobConfig,
    retained: &Retained,
) -> Result<Arc<dyn BlobStore + Send + Sync>> {
    match config {
        BlobConfig::Memory {} => Ok(retained.blobs.clone()),
        BlobConfig::Filesystem { root } => {
            let blobs = FilesystemBlobs::new(root);
            // Fail at startup, not on the first upload
            blobs
                .validate()
                .await
                .context(BlobsSnafu { root: root.clone() })?;
            Ok(Arc::new(blobs))
        }
    }
}

fn make_state(
    cfg: &ConfigV1,
    storage: Arc<dyn StorageBackend + Send + Sync>,
    blobs: Arc<dyn BlobStore + Send + Sync>,
    exporter: PrometheusExporter,
) -> Notespace {
    Notespace {
        host: cfg.host.clone(),
        storage,
        blobs,
        exporter,
        pepper: cfg.pepper.clone(),
        signing_keys: cfg.signing_keys.clone(),
        token_lifetime: Duration::seconds(cfg.token_lifetime as i64),
        max_upload_bytes: cfg.max_upload_bytes,
    }
}

/// Serve notespace API requests
#[tracing::instrument(skip(opts, cfg, log_file_hup))]
async fn serve(
    opts: CliOpts,
    mut cfg: ConfigV1,
    log_file_hup: Option<mpsc::Sender<PathBuf>>,
) -> Result<()> {
    // Produce a future which can be used to signal graceful shutdown, below.
    async fn shutdown_signal(nfy: Arc<Notify>) {
        nfy.notified().await
    }

    let mut sighup = signal(SignalKind::hangup()).context(SignalSnafu)?;
    let mut sigterm = signal(SignalKind::terminate()).context(SignalSnafu)?;

    let exporter = init_telemetry();
    let retained = Retained {
        storage: Arc::new(InMemory::new()),
        blobs: Arc::new(MemoryBlobs::new()),
    };

    // Loop forever, handling SIGHUPs, until asked to terminate:
    loop {
        // Re-build our datastore connections each pass, in case configuration values have changed:
        let storage = select_storage(&cfg.storage_config, &retained).await?;
        let blobs = select_blobs(&cfg.blob_config, &retained).await?;
        let state = Arc::new(make_state(&cfg, storage, blobs, exporter.clone()));

        let nfy = Arc::new(Notify::new());
        let addr = cfg.public_address;
        let server = axum::serve(
            TcpListener::bind(addr).await.context(BindSnafu { addr })?,
            make_router(state),
        )
        .with_graceful_shutdown(shutdown_signal(nfy.clone()));
        let mut server = server.into_future();
        info!("Listening on {}", addr);

        tokio::select! {
            res = &mut server => {
                // This shouldn't happen!
                error!("The server exited unexpectedly with {:?}; shutting-down.", res);
                break;
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP; re-reading configuration.");
                nfy.notify_one();
                if let Err(err) = server.await {
                    error!("{:?}", err);
                }
                // Fall back to the last known-good configuration on failure
                cfg = match parse_config(&opts.cfg) {
                    Ok(cfg) => cfg,
                    Err(err) => {
                        error!("{:?}; retaining the prior configuration", err);
                        cfg
                    }
                };
                if let Some(ref lfh) = log_file_hup {
                    // Utilities like `logrotate` rename the log file underneath us & then send us
                    // a `SIGHUP`; close & re-open the file (under the same name) so that we write
                    // to the *new* file.
                    let pth = opts
                        .log_file
                        .clone()
                        .or(cfg.log_file.clone());
                    if let Some(pth) = pth {
                        lfh.send(pth).await.context(LogHupSnafu)?;
                        info!("Started new log file.");
                    }
                }
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM; terminating.");
                nfy.notify_one();
                if let Err(err) = server.await {
                    error!("{:?}", err);
                }
                break;
            }
        }; // End tokio::select!.
    } // End loop.

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                    main() & process startup                                    //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Read configuration, set up logging, & serve
///
/// The bootstrap logger installed by `main()` stays in place until the real subscriber (which
/// depends on configuration) is installed.
async fn go_async(
    opts: CliOpts,
    bootstrap_logging_guard: tracing::dispatcher::DefaultGuard,
) -> Result<()> {
    #[allow(clippy::type_complexity)]
    fn go_async1(
        opts: &CliOpts,
    ) -> Result<(
        ConfigV1,
        Box<dyn Layer<Registry> + Send + Sync>,
        EnvFilter,
        Option<mpsc::Sender<PathBuf>>,
    )> {
        // Failure to parse at this point is fatal; below, in `serve()`, we fall back to the last
        // "known-good" configuration & keep going.
        let cfg = parse_config(&opts.cfg)?;
        let log_file = opts.log_file.as_deref().or(cfg.log_file.as_deref());
        let (formatter, filter, log_file_hup) = configure_logging(&opts.log_opts, log_file)?;
        Ok((cfg, formatter, filter, log_file_hup))
    }

    match go_async1(&opts) {
        Ok((cfg, formatter, filter, log_file_hup)) => {
            // Nb. this can only be invoked once (will panic on a second invocation)!
            tracing::subscriber::set_global_default(
                Registry::default().with(formatter).with(filter),
            )
            .context(SubscriberSnafu)?;
            drop(bootstrap_logging_guard);

            info!("notespace version {} starting.", crate_version!());

            serve(opts, cfg, log_file_hup).await
        }
        Err(err) => {
            error!("While configuring logging: {err:?}");
            Err(err)
        }
    }
}

fn main() -> Result<()> {
    // Most of notespaced's configuration is read from file; the few command-line options govern
    // where to find that file & how to log. They all have corresponding environment variables for
    // the sake of convenience when running in a container.
    let opts = CliOpts::new(
        Command::new("notespaced")
            .version(crate_version!())
            .author(crate_authors!())
            .about("Share notes & files in collaborative spaces")
            .long_about(
                "`notespace` is a note & file sharing service: upload files, organize them by \
                 subject, comment, rate, bookmark & collaborate in shared spaces.",
            )
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .num_args(1)
                    .value_parser(value_parser!(PathBuf))
                    .env("NOTESPACE_CONFIG")
                    .help(
                        "path (absolute or relative to the process' current directory) to a \
                         configuration file",
                    ),
            )
            .arg(
                Arg::new("debug")
                    .short('D')
                    .long("debug")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("NOTESPACE_DEBUG")
                    .help("produce debug output"),
            )
            .arg(
                Arg::new("log-file")
                    .short('l')
                    .long("log-file")
                    .num_args(1)
                    .value_parser(value_parser!(PathBuf))
                    .env("NOTESPACE_LOG_FILE")
                    .help("log to this file rather than stdout (overrides configuration)"),
            )
            .arg(
                Arg::new("plain")
                    .short('p')
                    .long("plain")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("NOTESPACE_PLAIN")
                    .help("log in human-readable format, not JSON/structured logging"),
            )
            .arg(
                Arg::new("quiet")
                    .short('q')
                    .long("quiet")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("NOTESPACE_QUIET")
                    .help("produce only error output"),
            )
            .arg(
                Arg::new("verbose")
                    .short('v')
                    .long("verbose")
                    .num_args(0)
                    .action(ArgAction::SetTrue)
                    .env("NOTESPACE_VERBOSE")
                    .help("produce prolix output"),
            )
            .get_matches(),
    );

    // A number of things can go wrong before we've parsed our configuration file and configured
    // logging for real, so set up a *temporary* stderr logger via `set_default()`
    // (<https://github.com/tokio-rs/tracing/issues/2903>).
    let bootstrap_subscriber = tracing_subscriber::registry::Registry::default()
        .with(tracing_subscriber::fmt::Layer::default().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(opts.log_opts.level.into())
                .from_env()
                .context(EnvFilterSnafu)?,
        );
    let bootstrap_logging_guard = tracing::subscriber::set_default(bootstrap_subscriber);
    debug!("Temporarily logging to stderr while initializing.");

    tokio::runtime::Runtime::new()
        .context(TokioRuntimeSnafu)?
        .block_on(go_async(opts, bootstrap_logging_guard)) // and start our server!
}
