//! Snapshot commands

use super::{interrupt_signal, local_permissions, print_item, print_line, print_page, split_tag, CliResult};
use appconf_core::access::Action;
use appconf_core::model::{
    CompositionType, NewSnapshot, SnapshotFilter, SnapshotSearchOptions, StatusFilter,
};
use appconf_core::query::StringFilter;
use appconf_store::{AppConfOptions, KeyValueStore, ProvisioningWorker, SnapshotEngine};
use clap::{Args, Subcommand};
use futures::TryStreamExt;
use std::sync::Arc;

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    #[command(subcommand)]
    pub command: SnapshotCommand,
}

#[derive(Debug, Subcommand)]
pub enum SnapshotCommand {
    /// Define a snapshot and materialize its content
    Create(CreateArgs),
    /// List snapshots by name and status
    List(ListArgs),
    /// Show one snapshot
    Get(NameArgs),
    /// Provision one pending snapshot, or every pending snapshot
    Provision(ProvisionArgs),
    /// Move a ready snapshot to archived
    Archive(TransitionArgs),
    /// Move an archived snapshot back to ready
    Recover(TransitionArgs),
    /// Print a snapshot's settings
    Read(ReadArgs),
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    pub name: String,

    /// Key filter of a single composition filter
    #[arg(long, conflicts_with = "filters")]
    pub key: Option<String>,

    /// Exact label for the single filter (null label when omitted)
    #[arg(long, requires = "key")]
    pub label: Option<String>,

    /// Tag filter `name=value` for the single filter, repeatable
    #[arg(long = "tag", requires = "key")]
    pub tags: Vec<String>,

    /// JSON array of `{"key", "label", "tags"}` filters, applied in order
    #[arg(long)]
    pub filters: Option<String>,

    /// `key` or `key_label`
    #[arg(long, default_value = "key")]
    pub composition: CompositionType,

    /// Seconds an archived snapshot is kept
    #[arg(long)]
    pub retention: Option<u64>,

    /// Snapshot tag `name=value`, repeatable
    #[arg(long = "meta")]
    pub meta: Vec<String>,

    /// Leave the snapshot in provisioning for the worker
    #[arg(long)]
    pub no_provision: bool,
}

impl CreateArgs {
    fn request(&self) -> Result<NewSnapshot, Box<dyn std::error::Error>> {
        let filters: Vec<SnapshotFilter> = match (&self.filters, &self.key) {
            (Some(json), _) => serde_json::from_str(json)?,
            (None, Some(key)) => {
                let filter = self
                    .tags
                    .iter()
                    .fold(SnapshotFilter::new(key.as_str(), self.label.as_deref()), |f, tag| {
                        f.with_tag(tag.as_str())
                    });
                vec![filter]
            }
            (None, None) => return Err("Must specify either --key or --filters".into()),
        };

        let mut request = filters
            .into_iter()
            .fold(NewSnapshot::new(self.name.as_str()), NewSnapshot::with_filter)
            .with_composition(self.composition);
        if let Some(seconds) = self.retention {
            request = request.with_retention(seconds);
        }
        for raw in &self.meta {
            let (name, value) = split_tag(raw);
            request.tags.insert(name.to_string(), value.map(str::to_string));
        }
        Ok(request)
    }
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Name filter (`release-*`, `a,b`)
    #[arg(long)]
    pub name: Option<String>,

    /// Comma separated statuses (all when omitted)
    #[arg(long)]
    pub status: Option<String>,

    #[arg(long)]
    pub after: Option<String>,

    #[arg(long)]
    pub select: Option<String>,
}

#[derive(Debug, Args)]
pub struct NameArgs {
    pub name: String,

    #[arg(long)]
    pub select: Option<String>,
}

#[derive(Debug, Args)]
pub struct ProvisionArgs {
    /// Snapshot to provision; every pending snapshot when omitted
    pub name: Option<String>,

    /// Keep polling for pending snapshots until interrupted
    #[arg(long, conflicts_with = "name")]
    pub watch: bool,
}

#[derive(Debug, Args)]
pub struct TransitionArgs {
    pub name: String,

    /// Current etag of the snapshot
    #[arg(long)]
    pub etag: String,
}

#[derive(Debug, Args)]
pub struct ReadArgs {
    pub name: String,

    /// Continuation token from a previous page
    #[arg(long, conflicts_with = "all")]
    pub after: Option<String>,

    /// Stream every setting as one JSON line each
    #[arg(long)]
    pub all: bool,

    #[arg(long)]
    pub select: Option<String>,
}

pub async fn execute(args: SnapshotArgs, options: &AppConfOptions) -> CliResult {
    let settings = KeyValueStore::open_file(&options.settings).await?;
    let engine = Arc::new(SnapshotEngine::open(options, Arc::new(settings)).await?);
    let cancel = interrupt_signal();
    let permissions = local_permissions();

    match args.command {
        SnapshotCommand::Create(create_args) => {
            permissions.require(Action::SnapshotCreate)?;
            permissions.require(Action::KeyValueRead)?;
            let mut snapshot = engine.create(create_args.request()?, &cancel).await?;
            if !create_args.no_provision {
                let worker = ProvisioningWorker::new(Arc::clone(&engine), &options.snapshots);
                snapshot = worker.provision_with_retry(&snapshot.name, &cancel).await?;
            }
            print_item(&snapshot, None)
        }
        SnapshotCommand::List(list_args) => {
            permissions.require(Action::SnapshotRead)?;
            let search = SnapshotSearchOptions {
                name: match &list_args.name {
                    Some(expr) => StringFilter::parse("name", expr)?,
                    None => StringFilter::any(),
                },
                status: match &list_args.status {
                    Some(list) => StatusFilter::parse(list)?,
                    None => StatusFilter::ALL,
                },
                continuation_token: list_args.after.clone(),
            };
            print_page(&engine.list(&search)?, list_args.select.as_deref())
        }
        SnapshotCommand::Get(name_args) => {
            permissions.require(Action::SnapshotRead)?;
            print_item(&engine.get(&name_args.name)?, name_args.select.as_deref())
        }
        SnapshotCommand::Provision(provision_args) => {
            permissions.require(Action::SnapshotCreate)?;
            let worker = ProvisioningWorker::new(Arc::clone(&engine), &options.snapshots);
            match (provision_args.name, provision_args.watch) {
                (Some(name), _) => {
                    let snapshot = worker.provision_with_retry(&name, &cancel).await?;
                    print_item(&snapshot, None)
                }
                (None, true) => {
                    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
                    tokio::spawn(async move {
                        if tokio::signal::ctrl_c().await.is_ok() {
                            let _ = shutdown_tx.send(true);
                        }
                    });
                    worker.run(shutdown_rx).await;
                    Ok(())
                }
                (None, false) => {
                    let finished = worker.run_once(&cancel).await?;
                    println!("{}", serde_json::json!({ "provisioned": finished }));
                    Ok(())
                }
            }
        }
        SnapshotCommand::Archive(transition) => {
            permissions.require(Action::SnapshotArchive)?;
            let snapshot = engine.archive(&transition.name, Some(&transition.etag)).await?;
            print_item(&snapshot, None)
        }
        SnapshotCommand::Recover(transition) => {
            permissions.require(Action::SnapshotArchive)?;
            let snapshot = engine.recover(&transition.name, Some(&transition.etag)).await?;
            print_item(&snapshot, None)
        }
        SnapshotCommand::Read(read_args) => {
            permissions.require(Action::SnapshotRead)?;
            if read_args.all {
                let mut items = engine.read_content(&read_args.name, 0, &cancel).await?;
                while let Some(kv) = items.try_next().await? {
                    print_line(&kv, read_args.select.as_deref())?;
                }
                Ok(())
            } else {
                let page = engine
                    .content_page(&read_args.name, read_args.after.as_deref(), &cancel)
                    .await?;
                print_page(&page, read_args.select.as_deref())
            }
        }
    }
}
