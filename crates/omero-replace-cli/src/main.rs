// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use clap::{Parser, Subcommand};
use inquire::{Password, PasswordDisplayMode, Select, Text};
use log::debug;
use omero_replace::{
    ApplyOptions, Client, ConnectOptions, Dataset, DatasetID, Error, GroupID, ObjectService,
    Progress, Session, Settings, TargetChoice, UpdateReport, apply_updates, preview_target,
    read_rows, resolve_target,
};
use std::{
    fmt::Display,
    fs::File,
    io::IsTerminal,
    path::{Path, PathBuf},
    process::ExitCode,
};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// OMERO.web server, a URL or a host name reached over HTTPS
    #[clap(long, env = "OMERO_HOST")]
    host: Option<String>,

    /// OMERO Username
    #[clap(long, env = "OMERO_USERNAME")]
    username: Option<String>,

    /// OMERO Password
    #[clap(long, env = "OMERO_PASSWORD")]
    password: Option<String>,

    /// Settings file, defaults to omero-replace/config.toml in the user's
    /// configuration directory
    #[clap(long)]
    config: Option<PathBuf>,

    /// Client Command
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
enum Command {
    /// Returns the OMERO.web JSON API version.
    Version,
    /// List the groups the user is a member of.
    Groups,
    /// List the datasets of a group.
    Datasets {
        /// Group ID
        #[clap(long, env = "OMERO_GROUP")]
        group: Option<String>,
    },
    /// Replace shape comments using the rows of a CSV file.  Each row must
    /// provide image_id, shape_id, old_text and new_text; a shape is only
    /// changed when its comment is exactly old_text.  Every image found is
    /// linked into the target dataset.
    Apply {
        /// CSV file with the replacements
        csv: PathBuf,

        /// Group ID
        #[clap(long, env = "OMERO_GROUP")]
        group: Option<String>,

        /// Target dataset ID, or 0 to create a new dataset
        #[clap(long, env = "OMERO_DATASET")]
        dataset: Option<String>,

        /// Name of the dataset to create
        #[clap(long)]
        dataset_name: Option<String>,

        /// Check every row without linking or saving anything
        #[clap(long)]
        dry_run: bool,

        /// Write the outcome of every row to this CSV file
        #[clap(long)]
        report: Option<PathBuf>,
    },
}

/// A choice in the interactive dataset selection.
enum DatasetOption {
    Create,
    Existing(Dataset),
}

impl Display for DatasetOption {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            DatasetOption::Create => write!(f, "Create a new dataset"),
            DatasetOption::Existing(dataset) => write!(f, "{}", dataset),
        }
    }
}

fn interactive() -> bool {
    std::io::stdin().is_terminal()
}

fn prompt_error(err: inquire::InquireError) -> Error {
    Error::Validation(err.to_string())
}

fn credentials(args: &Args, settings: &Settings) -> Result<(String, String), Error> {
    let username = match args.username.clone().or(settings.username.clone()) {
        Some(username) => username,
        None if interactive() => Text::new("OMERO Username")
            .prompt()
            .map_err(prompt_error)?,
        None => return Err(Error::Validation("username is required".to_string())),
    };

    let password = match args.password.clone().or(settings.password.clone()) {
        Some(password) => password,
        None if interactive() => Password::new("OMERO Password")
            .with_display_mode(PasswordDisplayMode::Masked)
            .without_confirmation()
            .prompt()
            .map_err(prompt_error)?,
        None => return Err(Error::Validation("password is required".to_string())),
    };

    Ok((username, password))
}

async fn connect(args: &Args, settings: &Settings) -> Result<Session<Client>, Error> {
    let (username, password) = credentials(args, settings)?;
    let options = ConnectOptions {
        host: host(args, settings),
        username,
        password,
        server_id: settings.server_id,
        timeout: settings.effective_timeout(),
    };
    Session::connect(&options).await
}

fn host(args: &Args, settings: &Settings) -> String {
    args.host
        .clone()
        .or(settings.host.clone())
        .unwrap_or_else(|| "http://localhost:4080".to_string())
}

async fn select_group<S: ObjectService>(
    session: &mut Session<S>,
    group: Option<GroupID>,
) -> Result<(), Error> {
    let group = match group {
        Some(group) => group,
        None if interactive() => {
            let groups = session.groups().await?;
            Select::new("Group", groups)
                .prompt()
                .map_err(prompt_error)?
                .id()
        }
        None => {
            return Err(Error::Validation(
                "a group is required, use --group".to_string(),
            ));
        }
    };
    session.select_group(group).await?;
    Ok(())
}

fn target_choice(
    datasets: &[Dataset],
    dataset: Option<DatasetID>,
    dataset_name: Option<String>,
) -> Result<TargetChoice, Error> {
    if let Some(dataset) = dataset {
        return Ok(TargetChoice::from_selection(dataset, dataset_name.as_deref()));
    }

    if let Some(name) = dataset_name {
        return Ok(TargetChoice::Create(name));
    }

    if !interactive() {
        return Err(Error::Validation(
            "a dataset is required, use --dataset or --dataset-name".to_string(),
        ));
    }

    let create = || {
        Text::new("New dataset name")
            .prompt()
            .map(TargetChoice::Create)
            .map_err(prompt_error)
    };

    if datasets.is_empty() {
        println!("The group has no datasets, a new one will be created.");
        return create();
    }

    let mut options = vec![DatasetOption::Create];
    options.extend(datasets.iter().cloned().map(DatasetOption::Existing));
    match Select::new("Dataset", options)
        .prompt()
        .map_err(prompt_error)?
    {
        DatasetOption::Create => create(),
        DatasetOption::Existing(dataset) => Ok(TargetChoice::Existing(dataset.id())),
    }
}

async fn handle_version(args: &Args, settings: &Settings) -> Result<(), Error> {
    let client = Client::with_timeout_secs(settings.effective_timeout())?
        .with_server(&host(args, settings))?;
    let version = client.version().await?;
    println!(
        "OMERO.web [{}] API: {} Client: {}",
        client.url(),
        version,
        env!("CARGO_PKG_VERSION")
    );
    Ok(())
}

async fn handle_groups(args: &Args, settings: &Settings) -> Result<(), Error> {
    let mut session = connect(args, settings).await?;
    let groups = session
        .scoped(async |session| session.groups().await)
        .await?;
    for group in groups {
        println!("[{}] {}", group.id(), group.name());
    }
    Ok(())
}

async fn handle_datasets(
    args: &Args,
    settings: &Settings,
    group: Option<GroupID>,
) -> Result<(), Error> {
    let mut session = connect(args, settings).await?;
    let datasets = session
        .scoped(async |session| {
            select_group(session, group).await?;
            session.datasets().await
        })
        .await?;
    for dataset in datasets {
        println!("[{}] {}", dataset.id(), dataset.name());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_apply(
    args: &Args,
    settings: &Settings,
    csv: &Path,
    group: Option<GroupID>,
    dataset: Option<DatasetID>,
    dataset_name: Option<String>,
    dry_run: bool,
    report_path: Option<PathBuf>,
) -> Result<(), Error> {
    use indicatif::{ProgressBar, ProgressStyle};
    use tokio::sync::mpsc;

    // Reject a malformed file before connecting.
    let rows = read_rows(File::open(csv)?)?;
    debug!("Loaded {} rows from {:?}", rows.len(), csv);

    let mut session = connect(args, settings).await?;

    let bar = ProgressBar::new(rows.len() as u64);
    bar.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise} ETA: {eta}] {msg}: {wide_bar:.yellow} {human_pos}/{human_len}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▇▆▅▄▃▂▁  "),
    );
    bar.set_message("Rows");

    let (tx, mut rx) = mpsc::channel::<Progress>(1);

    let progress = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            if progress.total > 0 {
                bar.set_length(progress.total as u64);
                bar.set_position(progress.current as u64);
            }
        }
        bar.finish_and_clear();
    });

    let options = ApplyOptions { dry_run };
    let result = session
        .scoped(async move |session| {
            select_group(session, group).await?;
            let datasets = session.datasets().await?;
            let choice = target_choice(&datasets, dataset, dataset_name)?;
            let target = if options.dry_run {
                preview_target(&datasets, &choice)?
            } else {
                resolve_target(session, &datasets, &choice).await?
            };
            apply_updates(session, &rows, &target, &options, Some(tx)).await
        })
        .await;

    // The sender is gone once the run ends, which stops the progress task.
    if let Err(err) = progress.await {
        debug!("Progress task ended abnormally: {}", err);
    }
    let report = result?;

    print_summary(&report, dry_run);

    if let Some(path) = report_path {
        report.write_csv(File::create(&path)?)?;
        println!("Report written to {}", path.display());
    }

    Ok(())
}

fn print_summary(report: &UpdateReport, dry_run: bool) {
    if dry_run {
        println!("Would update: {}", report.would_update());
    } else {
        println!("Updated: {}", report.updated());
    }
    println!("Skipped: {}", report.skipped());
    for (reason, count) in report.skips_by_reason() {
        println!("  {}: {}", reason, count);
    }
    println!("Failed: {}", report.failed());
    println!("Linked images: {}", report.linked().len());
}

fn parse_id<T>(value: Option<String>) -> Result<Option<T>, Error>
where
    T: for<'a> TryFrom<&'a str, Error = Error>,
{
    value.as_deref().map(T::try_from).transpose()
}

async fn run(args: Args) -> Result<(), Error> {
    let settings = Settings::load(args.config.as_deref())?;

    match args.cmd.clone() {
        Command::Version => handle_version(&args, &settings).await,
        Command::Groups => handle_groups(&args, &settings).await,
        Command::Datasets { group } => {
            let group = parse_id(group)?.or(settings.group);
            handle_datasets(&args, &settings, group).await
        }
        Command::Apply {
            csv,
            group,
            dataset,
            dataset_name,
            dry_run,
            report,
        } => {
            let group = parse_id(group)?.or(settings.group);
            let dataset = parse_id(dataset)?.or(settings.dataset);
            let dataset_name = dataset_name.or(settings.dataset_name.clone());
            handle_apply(
                &args,
                &settings,
                &csv,
                group,
                dataset,
                dataset_name,
                dry_run,
                report,
            )
            .await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}
