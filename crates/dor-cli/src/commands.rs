use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use colored::Colorize;
use dor_sdk::{
    DatastreamInput, DatastreamToken, Hints, IngestRequest, Pid, Repository, RepositoryConfig,
};
use dor_store::KeyMapper;
use serde::Serialize;
use tracing::debug;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    execute(cli, &mut out)?;
    out.flush()?;
    Ok(())
}

fn execute(cli: Cli, out: &mut dyn Write) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    debug!(?config, "configuration loaded");
    if let Command::Map(args) = &cli.command {
        return cmd_map(&config, args, cli.format, out);
    }

    let repo = Repository::open(&config).context("cannot open repository")?;
    match cli.command {
        Command::Ingest(args) => cmd_ingest(&repo, args, cli.format, out),
        Command::Cat(args) => cmd_cat(&repo, &args.target, out),
        Command::Ls(args) => cmd_ls(&repo, args, cli.format, out),
        Command::Size(args) => cmd_size(&repo, &args.target, cli.format, out),
        Command::Replace(args) => cmd_replace(&repo, args, cli.format, out),
        Command::Purge(args) => cmd_purge(&repo, &args.pid, cli.format, out),
        Command::Audit => cmd_audit(&repo, cli.format, out),
        Command::Rebuild => cmd_rebuild(&repo, cli.format, out),
        Command::Map(_) => Ok(()),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<RepositoryConfig> {
    match &cli.config {
        Some(path) => RepositoryConfig::from_file(path)
            .with_context(|| format!("cannot load {}", path.display())),
        None => {
            let mut config = RepositoryConfig::for_root(&cli.root);
            config.apply_overrides(|key| std::env::var(key).ok());
            Ok(config)
        }
    }
}

/// A command-line target: an object PID, or a datastream token when it
/// contains the `+` separator.
#[derive(Debug, PartialEq, Eq)]
enum Target {
    Object(Pid),
    Datastream(DatastreamToken),
}

impl Target {
    fn parse(s: &str) -> anyhow::Result<Self> {
        if s.contains('+') {
            Ok(Self::Datastream(DatastreamToken::parse(s)?))
        } else {
            Ok(Self::Object(Pid::parse(s)?))
        }
    }
}

/// `DSID/VERSION=VALUE`.
fn parse_assignment(s: &str) -> anyhow::Result<(String, String, String)> {
    let Some((name, value)) = s.split_once('=') else {
        bail!("expected DSID/VERSION=VALUE, got {s:?}");
    };
    let Some((dsid, version)) = name.split_once('/') else {
        bail!("expected DSID/VERSION before '=', got {name:?}");
    };
    if dsid.is_empty() || version.is_empty() || value.is_empty() {
        bail!("empty field in {s:?}");
    }
    Ok((dsid.to_string(), version.to_string(), value.to_string()))
}

fn open_file(path: &Path) -> anyhow::Result<BufReader<File>> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn print_json(out: &mut dyn Write, value: &impl Serialize) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn cmd_ingest(
    repo: &Repository,
    args: IngestArgs,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let pid = Pid::parse(&args.pid)?;
    let checksums = args
        .checksums
        .iter()
        .map(|s| parse_assignment(s))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let mut request = IngestRequest::new(pid, open_file(&args.object)?);
    for spec in &args.datastreams {
        let (dsid, version, file) = parse_assignment(spec)?;
        let mut input = DatastreamInput::new(&dsid, &version, open_file(&PathBuf::from(file))?);
        if let Some((_, _, hex)) = checksums
            .iter()
            .find(|(d, v, _)| *d == dsid && *v == version)
        {
            input = input.with_checksum(hex.clone());
        }
        request = request.with_datastream(input);
    }

    let receipt = repo.ingest(request)?;
    if format == OutputFormat::Json {
        return print_json(out, &receipt);
    }
    writeln!(out, "{} Ingested {}", "✓".green().bold(), receipt.pid.to_string().yellow().bold())?;
    writeln!(out, "  object  {:>10}  {}", receipt.object.size, receipt.object.digest.dimmed())?;
    for ds in &receipt.datastreams {
        writeln!(out, "  {}  {:>10}  {}", ds.token.cyan(), ds.size, ds.digest.dimmed())?;
    }
    Ok(())
}

fn cmd_cat(repo: &Repository, target: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    let mut reader = match Target::parse(target)? {
        Target::Object(pid) => repo.retrieve_object(&pid)?,
        Target::Datastream(token) => repo.retrieve_datastream(&token)?,
    };
    io::copy(&mut reader, out)?;
    Ok(())
}

fn cmd_ls(
    repo: &Repository,
    args: LsArgs,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let keys: Vec<String> = match &args.pid {
        Some(pid) => repo
            .list_datastreams(&Pid::parse(pid)?)?
            .iter()
            .map(DatastreamToken::to_token)
            .collect(),
        None => repo
            .list_objects()?
            .iter()
            .map(ToString::to_string)
            .collect(),
    };
    if format == OutputFormat::Json {
        return print_json(out, &keys);
    }
    for key in &keys {
        writeln!(out, "{key}")?;
    }
    Ok(())
}

fn cmd_size(
    repo: &Repository,
    target: &str,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let size = match Target::parse(target)? {
        Target::Object(pid) => repo.object_size(&pid)?,
        Target::Datastream(token) => repo.datastream_size(&token)?,
    };
    if format == OutputFormat::Json {
        return print_json(out, &serde_json::json!({ "key": target, "size": size }));
    }
    writeln!(out, "{size}")?;
    Ok(())
}

fn cmd_replace(
    repo: &Repository,
    args: ReplaceArgs,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let mut content = open_file(&args.file)?;
    let size = match Target::parse(&args.target)? {
        Target::Object(pid) => repo.replace_object(&pid, &mut content, &Hints::new())?,
        Target::Datastream(token) => repo.replace_datastream(&token, &mut content, &Hints::new())?,
    };
    if format == OutputFormat::Json {
        return print_json(out, &serde_json::json!({ "key": args.target, "size": size }));
    }
    writeln!(out, "{} Replaced {} ({size} bytes)", "✓".green().bold(), args.target.yellow())?;
    Ok(())
}

fn cmd_purge(
    repo: &Repository,
    pid: &str,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let report = repo.purge(&Pid::parse(pid)?)?;
    if format == OutputFormat::Json {
        return print_json(out, &report);
    }
    writeln!(
        out,
        "{} Purged {} ({} datastreams)",
        "✓".green().bold(),
        report.pid.to_string().yellow(),
        report.datastreams_removed
    )?;
    Ok(())
}

fn cmd_map(
    config: &RepositoryConfig,
    args: &MapArgs,
    format: OutputFormat,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let pattern = match args.scope {
        Scope::Object => &config.storage.object_pattern,
        Scope::Datastream => &config.storage.datastream_pattern,
    };
    let mapper = KeyMapper::new(&config.storage.internal_prefix, pattern)?;
    let id = mapper.to_internal(&args.key)?;
    if format == OutputFormat::Json {
        return print_json(out, &serde_json::json!({ "key": args.key, "id": id }));
    }
    writeln!(out, "{id}")?;
    Ok(())
}

fn cmd_audit(repo: &Repository, format: OutputFormat, out: &mut dyn Write) -> anyhow::Result<()> {
    let report = repo.audit()?;
    if format == OutputFormat::Json {
        return print_json(out, &report);
    }
    if report.is_clean() {
        writeln!(out, "{} No interrupted overwrites.", "✓".green().bold())?;
        return Ok(());
    }
    for (scope, orphans) in [("objects", &report.objects), ("datastreams", &report.datastreams)] {
        for orphan in orphans {
            let state = if orphan.base_exists { "present".green() } else { "missing".red() };
            writeln!(
                out,
                "  {scope:<11} {} {:?} (base {} {state})",
                orphan.id.to_string().yellow(),
                orphan.kind,
                orphan.base
            )?;
        }
    }
    writeln!(out, "{} {} temporaries found; run `dor rebuild`.", "!".red().bold(), report.len())?;
    Ok(())
}

fn cmd_rebuild(repo: &Repository, format: OutputFormat, out: &mut dyn Write) -> anyhow::Result<()> {
    let report = repo.rebuild()?;
    if format == OutputFormat::Json {
        return print_json(out, &report);
    }
    for id in &report.restored {
        writeln!(out, "  {} {id}", "restored".green())?;
    }
    for id in &report.removed {
        writeln!(out, "  {} {id}", "removed".dimmed())?;
    }
    writeln!(
        out,
        "{} Rebuild done: {} restored, {} removed.",
        "✓".green().bold(),
        report.restored.len(),
        report.removed.len()
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn run(root: &Path, args: &[&str]) -> anyhow::Result<Vec<u8>> {
        let mut argv = vec!["dor", "--root", root.to_str().unwrap()];
        argv.extend_from_slice(args);
        let cli = Cli::parse_from(argv);
        let mut out = Vec::new();
        execute(cli, &mut out)?;
        Ok(out)
    }

    fn write(dir: &Path, name: &str, content: &[u8]) -> String {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn target_parsing() {
        assert_eq!(
            Target::parse("demo:1").unwrap(),
            Target::Object(Pid::parse("demo:1").unwrap())
        );
        assert!(matches!(
            Target::parse("demo:1+DC+DC.0").unwrap(),
            Target::Datastream(_)
        ));
        assert!(Target::parse("no-colon").is_err());
    }

    #[test]
    fn assignment_parsing() {
        assert_eq!(
            parse_assignment("DC/DC.0=dc.xml").unwrap(),
            ("DC".into(), "DC.0".into(), "dc.xml".into())
        );
        assert!(parse_assignment("DC=dc.xml").is_err());
        assert!(parse_assignment("DC/DC.0").is_err());
        assert!(parse_assignment("/DC.0=x").is_err());
    }

    #[test]
    fn ingest_cat_ls_purge() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        let object = write(dir.path(), "obj.xml", b"<object/>");
        let dc = write(dir.path(), "dc.xml", b"<dc/>");
        let dc_spec = format!("DC/DC.0={dc}");

        run(&root, &["ingest", "demo:1", &object, "-d", &dc_spec]).unwrap();

        assert_eq!(run(&root, &["cat", "demo:1"]).unwrap(), b"<object/>");
        assert_eq!(run(&root, &["cat", "demo:1+DC+DC.0"]).unwrap(), b"<dc/>");
        assert_eq!(run(&root, &["size", "demo:1+DC+DC.0"]).unwrap(), b"5\n");
        assert_eq!(run(&root, &["ls"]).unwrap(), b"demo:1\n");
        assert_eq!(run(&root, &["ls", "demo:1"]).unwrap(), b"demo:1+DC+DC.0\n");

        let again = run(&root, &["ingest", "demo:1", &object]).unwrap_err();
        assert!(again.to_string().contains("already"));

        run(&root, &["purge", "demo:1"]).unwrap();
        assert_eq!(run(&root, &["ls"]).unwrap(), b"");
    }

    #[test]
    fn replace_and_json_output() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        let object = write(dir.path(), "obj.xml", b"v1");
        let newer = write(dir.path(), "obj2.xml", b"version two");
        run(&root, &["ingest", "demo:1", &object]).unwrap();

        run(&root, &["replace", "demo:1", &newer]).unwrap();
        assert_eq!(run(&root, &["cat", "demo:1"]).unwrap(), b"version two");

        let json = run(&root, &["--format", "json", "size", "demo:1"]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["size"], 11);

        let audit = run(&root, &["--format", "json", "audit"]).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&audit).unwrap();
        assert_eq!(value["objects"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn checksum_mismatch_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("repo");
        let object = write(dir.path(), "obj.xml", b"<object/>");
        let dc = write(dir.path(), "dc.xml", b"<dc/>");
        let dc_spec = format!("DC/DC.0={dc}");
        let wrong = format!("DC/DC.0={}", "0".repeat(64));

        let err = run(
            &root,
            &["ingest", "demo:1", &object, "-d", &dc_spec, "--checksum", &wrong],
        )
        .unwrap_err();
        assert!(err.to_string().contains("checksum mismatch"));
        assert_eq!(run(&root, &["ls"]).unwrap(), b"");
    }

    #[test]
    fn map_prints_internal_id() {
        let dir = tempfile::tempdir().unwrap();
        let out = run(dir.path(), &["map", "demo:1"]).unwrap();
        let id = String::from_utf8(out).unwrap();
        assert!(id.starts_with("file:"));
        assert!(id.trim_end().ends_with("demo%3A1"));
    }

    #[test]
    fn missing_object_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run(dir.path(), &["cat", "demo:none"]).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
