// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use {
    clap::{Arg, ArgMatches, Command},
    debian_upload::{
        changes::ChangesFile,
        error::DebianError,
        package_version::compare_versions,
        transport::transport_from_str,
        upload::{UploadConfig, UploadEvent, UploadOutcome, Uploader},
        upload_ledger::{ledger_path_for, UploadLedger},
    },
    log::{error, info, warn, LevelFilter},
    std::{
        cmp::Ordering,
        path::{Path, PathBuf},
    },
    thiserror::Error,
};

const URLS_ABOUT: &str = "\
Destination URLs

Commands uploading files accept a URL describing where files are sent. Here is
how they work.

If a value contains `://`, it will be parsed as a URL. Otherwise it will be
interpreted as a local filesystem path.

The following URL schemes (the part before the `://` in a URL) are recognized:

file://
   A local filesystem path. The path component of the URL is interpreted as
   a filesystem path. Files are copied beneath this directory.

null://
   A destination that points to nothing.

   Uploads to it always succeed and their content is discarded. This is
   useful to record files as uploaded without sending them anywhere.

   null://fail
      Uploads to it always fail. Useful for testing failure handling.

The incoming path is appended to the destination to form the directory
receiving files.
";

const UPLOAD_ABOUT: &str = "\
Upload files described by .changes files.

The argument is the path to a .changes file or to a directory. When given
a directory, every file with a .changes extension in it is uploaded, in name
order. A failure to upload one .changes file doesn't prevent uploading the
others.

Before anything is sent, the .changes file is validated: it must name at least
one distribution (and not UNRELEASED), reference at least one file, and every
referenced file must exist next to it with the recorded size and digests.

Progress is recorded in a ledger file next to each .changes file. The ledger of
`foo_1.0_amd64.changes` is `foo_1.0_amd64.upload`. Files the ledger records as
uploaded are not sent again, so an interrupted upload can be resumed by running
the same command again. Once everything has been sent, the .changes file is
recorded as successfully uploaded.

# YAML Configuration

Instead of arguments, a YAML file can define where files are uploaded. It has
the following keys:

destination_url (required) (string)
   The URL or path files are uploaded to. See `dut urls`.

incoming_path (optional) (string)
   The directory at the destination receiving files. Defaults to the root of
   the destination.

distribution_pattern (optional) (string)
   A token in `incoming_path` that is replaced by the distributions named in
   the .changes file. Files are uploaded once per resulting directory.

   For example, an `incoming_path` of `incoming/DIST` with a pattern of `DIST`
   uploads a .changes file for `stable` and `testing` into `incoming/stable`
   and `incoming/testing`.
";

#[derive(Debug, Error)]
pub enum DutError {
    #[error("argument parsing error: {0:?}")]
    Clap(#[from] clap::Error),

    #[error("{0}")]
    Debian(#[from] DebianError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0:?}")]
    SerdeYaml(#[from] serde_yaml::Error),

    #[error("invalid sub-command: {0}")]
    InvalidSubCommand(String),

    #[error("{0} of {1} uploads failed")]
    UploadsFailed(usize, usize),
}

pub type Result<T> = std::result::Result<T, DutError>;

fn path_arg(name: &'static str, help: &'static str) -> Arg<'static> {
    Arg::new(name)
        .required(true)
        .allow_invalid_utf8(true)
        .help(help)
}

pub fn run_cli() -> Result<()> {
    let app = Command::new("Debian Upload Tool")
        .version("0.1")
        .author("Gregory Szorc <gregory.szorc@gmail.com>")
        .about("Upload Debian packages described by .changes files")
        .arg_required_else_help(true);

    let app = app.arg(
        Arg::new("verbose")
            .long("verbose")
            .short('v')
            .global(true)
            .multiple_occurrences(true)
            .help("Increase logging verbosity. Can be specified multiple times."),
    );

    let app = app.subcommand(
        Command::new("compare-versions")
            .about("Compare two Debian package versions")
            .arg(Arg::new("a").required(true).help("First version"))
            .arg(Arg::new("b").required(true).help("Second version")),
    );

    let app = app.subcommand(
        Command::new("parse-changes")
            .about("Parse a .changes file and print its canonical form")
            .arg(path_arg("path", "Path to a .changes file")),
    );

    let app = app.subcommand(
        Command::new("validate-changes")
            .about("Validate a .changes file against the files next to it")
            .arg(path_arg("path", "Path to a .changes file")),
    );

    let app = app.subcommand(
        Command::new("show-ledger")
            .about("Print the upload ledger of a .changes file")
            .arg(path_arg(
                "path",
                "Path to a .changes file or to its .upload ledger",
            )),
    );

    let app = app.subcommand(
        Command::new("upload")
            .about("Upload files described by .changes files")
            .long_about(UPLOAD_ABOUT)
            .arg(
                Arg::new("yaml-config")
                    .long("yaml-config")
                    .takes_value(true)
                    .allow_invalid_utf8(true)
                    .conflicts_with_all(&["destination", "incoming", "distribution-pattern"])
                    .help("Path to a YAML file defining the upload configuration"),
            )
            .arg(
                Arg::new("destination")
                    .long("destination")
                    .takes_value(true)
                    .required_unless_present("yaml-config")
                    .help("URL or path to upload to"),
            )
            .arg(
                Arg::new("incoming")
                    .long("incoming")
                    .takes_value(true)
                    .help("Directory at the destination receiving files"),
            )
            .arg(
                Arg::new("distribution-pattern")
                    .long("distribution-pattern")
                    .takes_value(true)
                    .help("Token in the incoming directory replaced by each distribution"),
            )
            .arg(path_arg(
                "path",
                "Path to a .changes file or a directory containing them",
            )),
    );

    let mut app = app.subcommand(Command::new("urls").about("Print documentation about destination URLs"));

    let matches = app.clone().get_matches();

    let log_level = match matches.occurrences_of("verbose") {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(log_level.as_str()),
    );

    // Disable log context except at higher log levels.
    if log_level <= LevelFilter::Info {
        builder
            .format_timestamp(None)
            .format_level(false)
            .format_target(false);
    }

    builder.init();

    match matches.subcommand() {
        Some(("compare-versions", args)) => command_compare_versions(args),
        Some(("parse-changes", args)) => command_parse_changes(args),
        Some(("validate-changes", args)) => command_validate_changes(args),
        Some(("show-ledger", args)) => command_show_ledger(args),
        Some(("upload", args)) => command_upload(args),
        Some(("urls", _)) => {
            println!("{}", URLS_ABOUT);
            Ok(())
        }
        Some((command, _)) => Err(DutError::InvalidSubCommand(command.to_string())),
        None => {
            app.print_help()?;
            Ok(())
        }
    }
}

fn path_value(args: &ArgMatches) -> PathBuf {
    PathBuf::from(args.value_of_os("path").expect("path argument is required"))
}

/// Render the relationship between two versions, e.g. `1.0 < 1.1`.
fn describe_comparison(a: &str, b: &str) -> std::result::Result<String, DebianError> {
    let ordering = compare_versions(a, b)?;

    let symbol = match ordering {
        Ordering::Less => "<",
        Ordering::Equal => "=",
        Ordering::Greater => ">",
    };

    Ok(format!("{} {} {}", a, symbol, b))
}

fn command_compare_versions(args: &ArgMatches) -> Result<()> {
    let a = args.value_of("a").expect("a argument is required");
    let b = args.value_of("b").expect("b argument is required");

    println!("{}", describe_comparison(a, b)?);

    Ok(())
}

fn read_changes(path: &Path) -> Result<ChangesFile> {
    let (changes, rejected) = ChangesFile::from_path(path)?;

    for line in rejected {
        warn!("ignoring line: {}", line);
    }

    Ok(changes)
}

fn command_parse_changes(args: &ArgMatches) -> Result<()> {
    let changes = read_changes(&path_value(args))?;

    changes.write(&mut std::io::stdout())?;

    Ok(())
}

fn command_validate_changes(args: &ArgMatches) -> Result<()> {
    let path = path_value(args);
    let changes = read_changes(&path)?;

    let base_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    changes.validate(base_dir).map_err(DebianError::from)?;
    println!("{}: valid", path.display());

    Ok(())
}

fn command_show_ledger(args: &ArgMatches) -> Result<()> {
    let path = path_value(args);

    let ledger_path = if path.extension().map(|ext| ext == "changes").unwrap_or(false) {
        ledger_path_for(&path)
    } else {
        path
    };

    let (ledger, rejected) = UploadLedger::from_path(&ledger_path)?;
    for line in rejected {
        warn!("ignoring line: {}", line);
    }

    if ledger.is_empty() {
        info!("{} records no uploads", ledger_path.display());
    }

    for entry in ledger.iter() {
        for line in entry.lines() {
            println!("{}", line);
        }
    }

    Ok(())
}

fn upload_config(args: &ArgMatches) -> Result<UploadConfig> {
    if let Some(path) = args.value_of_os("yaml-config") {
        let f = std::fs::File::open(path)?;

        Ok(serde_yaml::from_reader(f)?)
    } else {
        Ok(UploadConfig {
            destination_url: args
                .value_of("destination")
                .expect("destination argument is required")
                .to_string(),
            incoming_path: args.value_of("incoming").unwrap_or_default().to_string(),
            distribution_pattern: args.value_of("distribution-pattern").map(|s| s.to_string()),
        })
    }
}

fn command_upload(args: &ArgMatches) -> Result<()> {
    let config = upload_config(args)?;
    let path = path_value(args);

    let transport = transport_from_str(&config.destination_url)?;

    let cb = Box::new(|event: UploadEvent| {
        if let UploadEvent::PendingFiles(..) = event {
            println!("{}", event);
        }
    });

    let uploader = Uploader::from_config(transport.as_ref(), &config).with_progress_callback(cb);

    let results = if path.is_dir() {
        uploader.publish_directory(&path)?
    } else {
        let res = uploader.publish(&path);
        vec![(path, res)]
    };

    let total = results.len();
    let mut failed = 0;

    for (path, res) in results {
        match res {
            Ok(UploadOutcome::AlreadyUploaded) => {
                println!("{}: already uploaded", path.display());
            }
            Ok(UploadOutcome::Uploaded { files, .. }) => {
                println!("{}: uploaded {} files", path.display(), files.len());
            }
            Err(e) => {
                error!("{}: {}", path.display(), e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        Err(DutError::UploadsFailed(failed, total))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn comparison() -> std::result::Result<(), DebianError> {
        assert_eq!(describe_comparison("1.0", "1.1")?, "1.0 < 1.1");
        assert_eq!(describe_comparison("1:0.1", "2.0")?, "1:0.1 > 2.0");
        assert_eq!(describe_comparison("1.0-1", "1.00-1")?, "1.0-1 = 1.00-1");
        assert!(describe_comparison("", "1.0").is_err());

        Ok(())
    }

    #[test]
    fn yaml_config() -> Result<()> {
        let config: UploadConfig = serde_yaml::from_str(
            "destination_url: file:///srv/debian\nincoming_path: incoming/DIST\ndistribution_pattern: DIST\n",
        )?;
        assert_eq!(config.destination_url, "file:///srv/debian");
        assert_eq!(config.incoming_path, "incoming/DIST");
        assert_eq!(config.distribution_pattern.as_deref(), Some("DIST"));

        let config: UploadConfig = serde_yaml::from_str("destination_url: null://\n")?;
        assert!(config.incoming_path.is_empty());
        assert!(config.distribution_pattern.is_none());

        assert!(serde_yaml::from_str::<UploadConfig>("incoming_path: x\n").is_err());
        assert!(serde_yaml::from_str::<UploadConfig>(
            "destination_url: null://\nbogus: true\n"
        )
        .is_err());

        Ok(())
    }
}
