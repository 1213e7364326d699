use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "dor",
    about = "Digital object repository: blob storage for objects and datastreams",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Repository configuration file (TOML).
    #[arg(short, long, global = true, conflicts_with = "root")]
    pub config: Option<PathBuf>,

    /// Repository root for the default filesystem layout.
    #[arg(long, global = true, default_value = ".dor")]
    pub root: PathBuf,
}

impl Cli {
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum Scope {
    Object,
    Datastream,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Store a new object with its datastreams
    Ingest(IngestArgs),
    /// Write an object record or datastream to stdout
    Cat(TargetArgs),
    /// List objects, or the datastreams of one object
    Ls(LsArgs),
    /// Print the size of an object record or datastream
    Size(TargetArgs),
    /// Overwrite an object record or datastream
    Replace(ReplaceArgs),
    /// Remove an object, its datastreams and its registration
    Purge(PurgeArgs),
    /// Show the internal blob id a key maps to
    Map(MapArgs),
    /// Report temporaries left by interrupted overwrites
    Audit,
    /// Restore or delete interrupted-overwrite temporaries
    Rebuild,
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Object PID, e.g. demo:1
    pub pid: String,
    /// File holding the serialized object record
    pub object: PathBuf,
    /// Datastream content as DSID/VERSION=FILE (repeatable)
    #[arg(short, long = "datastream", value_name = "DSID/VERSION=FILE")]
    pub datastreams: Vec<String>,
    /// Expected BLAKE3 checksum as DSID/VERSION=HEX (repeatable)
    #[arg(long = "checksum", value_name = "DSID/VERSION=HEX")]
    pub checksums: Vec<String>,
}

#[derive(Args, Debug)]
pub struct TargetArgs {
    /// A PID, or a datastream token PID+DSID+VERSION
    pub target: String,
}

#[derive(Args, Debug)]
pub struct LsArgs {
    /// List this object's datastreams instead of all objects
    pub pid: Option<String>,
}

#[derive(Args, Debug)]
pub struct ReplaceArgs {
    /// A PID, or a datastream token PID+DSID+VERSION
    pub target: String,
    /// File with the new content
    pub file: PathBuf,
}

#[derive(Args, Debug)]
pub struct PurgeArgs {
    pub pid: String,
}

#[derive(Args, Debug)]
pub struct MapArgs {
    /// Object PID or datastream token
    pub key: String,
    #[arg(long, default_value = "object")]
    pub scope: Scope,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verbosity_maps_to_levels() {
        let cli = Cli::parse_from(["dor", "-vv", "audit"]);
        assert_eq!(cli.log_level(), "debug");
        assert_eq!(Cli::parse_from(["dor", "audit"]).log_level(), "warn");
    }

    #[test]
    fn ingest_collects_datastreams() {
        let cli = Cli::parse_from([
            "dor",
            "ingest",
            "demo:1",
            "obj.xml",
            "-d",
            "DC/DC.0=dc.xml",
            "--datastream",
            "THUMB/THUMB.0=t.png",
            "--root",
            "/srv/dor",
        ]);
        let Command::Ingest(args) = cli.command else {
            panic!("expected ingest");
        };
        assert_eq!(args.datastreams.len(), 2);
        assert_eq!(cli.root, PathBuf::from("/srv/dor"));
    }

    #[test]
    fn map_scope_defaults_to_object() {
        let cli = Cli::parse_from(["dor", "map", "demo:1"]);
        let Command::Map(args) = cli.command else {
            panic!("expected map");
        };
        assert_eq!(args.scope, Scope::Object);
    }
}
