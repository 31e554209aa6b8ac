use anyhow::Context;
use bucketfs::{
    client::{ObjectClient, ObjectStream},
    config::Config,
    filesystem::{FileSystem, ObjectStorageAdapter, Visibility, WriteOptions},
    Result,
};
use clap::{Arg, ArgAction, ArgMatches, Command};
use futures::TryStreamExt;
use serde::Serialize;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

fn path_arg(name: &'static str) -> Arg {
    Arg::new(name).required(true)
}

fn cli() -> Command {
    Command::new("bucketfs")
        .version("0.1")
        .about("File operations against an object storage bucket")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .global(true)
                .help("Configuration file path")
        )
        .subcommand(
            Command::new("ls")
                .about("List a directory")
                .arg(Arg::new("dir").help("Directory, bucket root when absent"))
                .arg(
                    Arg::new("recursive")
                        .short('r')
                        .long("recursive")
                        .action(ArgAction::SetTrue)
                        .help("Accepted for compatibility; the listing stays one level deep")
                )
        )
        .subcommand(Command::new("cat").about("Print an object").arg(path_arg("path")))
        .subcommand(
            Command::new("get")
                .about("Download an object through a signed url")
                .arg(path_arg("path"))
                .arg(Arg::new("file").help("Destination, stdout when absent"))
        )
        .subcommand(
            Command::new("put")
                .about("Upload an object")
                .arg(path_arg("path"))
                .arg(Arg::new("file").help("Source, stdin when absent"))
                .arg(Arg::new("content-type").long("content-type").value_name("MIME"))
                .arg(Arg::new("public").long("public").action(ArgAction::SetTrue))
        )
        .subcommand(Command::new("cp").about("Copy an object").arg(path_arg("src")).arg(path_arg("dst")))
        .subcommand(Command::new("mv").about("Rename an object").arg(path_arg("src")).arg(path_arg("dst")))
        .subcommand(Command::new("rm").about("Delete an object").arg(path_arg("path")))
        .subcommand(Command::new("mkdir").about("Create a directory").arg(path_arg("dir")))
        .subcommand(Command::new("rmdir").about("Delete a directory and its contents").arg(path_arg("dir")))
        .subcommand(Command::new("stat").about("Show object metadata").arg(path_arg("path")))
        .subcommand(Command::new("exists").about("Check whether an object exists").arg(path_arg("path")))
        .subcommand(
            Command::new("chmod")
                .about("Set object visibility")
                .arg(path_arg("path"))
                .arg(Arg::new("visibility").required(true).help("public or private"))
        )
        .subcommand(Command::new("acl").about("Show the object ACL").arg(path_arg("path")))
        .subcommand(
            Command::new("url")
                .about("Print a signed download url")
                .arg(path_arg("path"))
                .arg(
                    Arg::new("expires")
                        .long("expires")
                        .value_name("SECS")
                        .default_value("3600")
                        .value_parser(clap::value_parser!(u64))
                )
        )
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn arg<'a>(matches: &'a ArgMatches, name: &str) -> &'a str {
    matches.get_one::<String>(name).map(|s| s.as_str()).unwrap_or_default()
}

/// Runs one subcommand; `Ok(false)` means the store refused the operation.
async fn run<C: ObjectClient>(fs: &ObjectStorageAdapter<C>, matches: &ArgMatches) -> Result<bool> {
    let (name, sub) = match matches.subcommand() {
        Some(subcommand) => subcommand,
        None => return Ok(false),
    };

    let ok = match name {
        "ls" => {
            for entry in fs.list_contents(arg(sub, "dir"), sub.get_flag("recursive")).await? {
                print_json(&entry)?;
            }
            true
        }
        "cat" => {
            let record = fs.read(arg(sub, "path")).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&record.contents.unwrap_or_default()).await?;
            stdout.flush().await?;
            true
        }
        "get" => {
            let record = fs.read_stream(arg(sub, "path")).await?;
            let Some(mut stream) = record.stream else {
                return Ok(false);
            };
            let mut out: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match sub.get_one::<String>("file") {
                Some(file) => Box::new(tokio::fs::File::create(file).await?),
                None => Box::new(tokio::io::stdout()),
            };
            while let Some(chunk) = stream.try_next().await? {
                out.write_all(&chunk).await?;
            }
            out.flush().await?;
            true
        }
        "put" => {
            let stream = match sub.get_one::<String>("file") {
                Some(file) => ObjectStream::from_reader(tokio::fs::File::open(file).await?),
                None => ObjectStream::from_reader(tokio::io::stdin()),
            };
            let opts = WriteOptions {
                content_type: sub.get_one::<String>("content-type").cloned(),
                visibility: sub.get_flag("public").then_some(Visibility::Public),
            };
            let result = fs.write_stream(arg(sub, "path"), stream, opts).await?;
            print_json(&result)?;
            true
        }
        "cp" => fs.copy(arg(sub, "src"), arg(sub, "dst")).await?,
        "mv" => fs.rename(arg(sub, "src"), arg(sub, "dst")).await?,
        "rm" => fs.delete(arg(sub, "path")).await?,
        "mkdir" => fs.create_dir(arg(sub, "dir")).await?,
        "rmdir" => fs.delete_dir(arg(sub, "dir")).await?,
        "stat" => {
            print_json(&fs.get_metadata(arg(sub, "path")).await?)?;
            true
        }
        "exists" => {
            let exists = fs.has(arg(sub, "path")).await?;
            print_json(&serde_json::json!({ "path": arg(sub, "path"), "exists": exists }))?;
            true
        }
        "chmod" => {
            let visibility = Visibility::from(arg(sub, "visibility"));
            fs.set_visibility(arg(sub, "path"), visibility).await?
        }
        "acl" => {
            print_json(&fs.get_visibility(arg(sub, "path")).await?)?;
            true
        }
        "url" => {
            let expires = sub.get_one::<u64>("expires").copied().unwrap_or(3600);
            let url = fs.signed_url(arg(sub, "path"), Duration::from_secs(expires)).await?;
            println!("{}", url);
            true
        }
        _ => false,
    };

    Ok(ok)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli().get_matches();

    let config_file = matches.get_one::<String>("config")
        .map(|s| s.as_str())
        .unwrap_or("bucketfs.toml");

    let config = Config::load(config_file)
        .with_context(|| format!("cannot load configuration from {}", config_file))?;

    let log_level = match config.loglevel() {
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    let fs = ObjectStorageAdapter::connect(&config.storage).await?;
    info!(bucket = fs.bucket(), endpoint = %config.storage.endpoint, "connected");

    match run(&fs, &matches).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            error!("Operation was not acknowledged by the store");
            std::process::exit(1);
        }
        Err(e) => {
            error!("Operation failed: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        cli().debug_assert();
    }

    #[test]
    fn test_parse_put() {
        let matches = cli()
            .try_get_matches_from(["bucketfs", "-c", "alt.toml", "put", "a/b.txt", "local.txt", "--public"])
            .unwrap();
        assert_eq!(matches.get_one::<String>("config").unwrap(), "alt.toml");

        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "put");
        assert_eq!(arg(sub, "path"), "a/b.txt");
        assert_eq!(arg(sub, "file"), "local.txt");
        assert!(sub.get_flag("public"));
        assert_eq!(arg(sub, "content-type"), "");
    }

    #[test]
    fn test_parse_ls_defaults_to_root() {
        let matches = cli().try_get_matches_from(["bucketfs", "ls", "-r"]).unwrap();
        let (_, sub) = matches.subcommand().unwrap();
        assert_eq!(arg(sub, "dir"), "");
        assert!(sub.get_flag("recursive"));
    }
}
