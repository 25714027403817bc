//! Key-value commands

use super::{interrupt_signal, local_permissions, print_item, print_page, split_tag, CliResult};
use appconf_core::access::Action;
use appconf_core::model::{KeyValue, KeyValueSearchOptions};
use appconf_core::{evaluate, CancelSignal, EtagCondition, EtagMatch, Page, Range};
use appconf_store::errors::key_value_not_found;
use appconf_store::{AppConfOptions, KeyValueStore, SnapshotEngine};
use clap::{Args, Subcommand};
use std::sync::Arc;

#[derive(Debug, Args)]
pub struct KvArgs {
    #[command(subcommand)]
    pub command: KvCommand,
}

#[derive(Debug, Subcommand)]
pub enum KvCommand {
    /// Create or replace a setting
    Set(SetArgs),
    /// Show the live value of a setting
    Get(GetArgs),
    /// List live settings
    List(ListArgs),
    /// Soft-delete a setting
    Delete(EntryArgs),
    /// Make a setting read-only
    Lock(EntryArgs),
    /// Make a setting writable again
    Unlock(EntryArgs),
    /// List every revision, newest first
    Revisions(ListArgs),
}

#[derive(Debug, Args)]
pub struct SetArgs {
    pub key: String,

    #[arg(long)]
    pub label: Option<String>,

    #[arg(long)]
    pub value: Option<String>,

    #[arg(long)]
    pub content_type: Option<String>,

    /// `name=value`, repeatable
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Only write when the live etag matches (`*` for any live value)
    #[arg(long)]
    pub if_match: Option<String>,

    #[arg(long)]
    pub select: Option<String>,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    pub key: String,

    #[arg(long)]
    pub label: Option<String>,

    /// Report "not modified" when the live etag matches
    #[arg(long)]
    pub if_none_match: Option<String>,

    #[arg(long)]
    pub select: Option<String>,
}

#[derive(Debug, Args)]
pub struct EntryArgs {
    pub key: String,

    #[arg(long)]
    pub label: Option<String>,

    #[arg(long)]
    pub if_match: Option<String>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Key filter (`app/*`, `a,b`)
    #[arg(long)]
    pub key: Option<String>,

    /// Label filter (`\0` for the null label)
    #[arg(long)]
    pub label: Option<String>,

    /// Tag filter `name=value`, repeatable; all must match
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Answer from a snapshot's content instead of live settings
    #[arg(long)]
    pub snapshot: Option<String>,

    /// Continuation token from a previous page
    #[arg(long)]
    pub after: Option<String>,

    /// First item index of the page to return
    #[arg(long)]
    pub from: Option<usize>,

    /// Exclusive end index of the page to return
    #[arg(long, requires = "from")]
    pub to: Option<usize>,

    #[arg(long)]
    pub select: Option<String>,
}

impl ListArgs {
    fn search_options(&self) -> Result<KeyValueSearchOptions, Box<dyn std::error::Error>> {
        let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
        let mut options =
            KeyValueSearchOptions::parse(self.key.as_deref(), self.label.as_deref(), &tags)?
                .with_continuation(self.after.clone());
        if let Some(from) = self.from {
            options = options.with_range(Range::new(from, self.to));
        }
        if let Some(name) = &self.snapshot {
            options = options.in_snapshot(name.as_str());
        }
        Ok(options)
    }
}

pub async fn execute(args: KvArgs, options: &AppConfOptions) -> CliResult {
    let store = KeyValueStore::open_file(&options.settings).await?;
    let cancel = interrupt_signal();
    let permissions = local_permissions();

    match args.command {
        KvCommand::Set(set_args) => {
            permissions.require(Action::KeyValueWrite)?;
            execute_set(&store, set_args, &cancel).await
        }
        KvCommand::Get(get_args) => {
            permissions.require(Action::KeyValueRead)?;
            execute_get(&store, get_args, &cancel).await
        }
        KvCommand::List(list_args) => {
            permissions.require(Action::KeyValueRead)?;
            let search = list_args.search_options()?;
            let page = if search.snapshot_name.is_some() {
                permissions.require(Action::SnapshotRead)?;
                let engine = SnapshotEngine::open(options, Arc::new(store)).await?;
                engine.query(&search, &cancel).await?
            } else {
                store.query(&search, &cancel).await?
            };
            print_page(&page, list_args.select.as_deref())
        }
        KvCommand::Revisions(list_args) => {
            permissions.require(Action::KeyValueRead)?;
            let page: Page<KeyValue> = store
                .query_revisions(&list_args.search_options()?, &cancel)
                .await?;
            print_page(&page, list_args.select.as_deref())
        }
        KvCommand::Delete(entry) => {
            permissions.require(Action::KeyValueDelete)?;
            let removed = store
                .remove(&entry.key, entry.label.as_deref(), entry.if_match.as_deref(), &cancel)
                .await?;
            match removed {
                Some(kv) => print_item(&kv, None),
                None => {
                    println!("null");
                    Ok(())
                }
            }
        }
        KvCommand::Lock(entry) => {
            permissions.require(Action::KeyValueWrite)?;
            let kv = store
                .lock(&entry.key, entry.label.as_deref(), entry.if_match.as_deref(), &cancel)
                .await?;
            print_item(&kv, None)
        }
        KvCommand::Unlock(entry) => {
            permissions.require(Action::KeyValueWrite)?;
            let kv = store
                .unlock(&entry.key, entry.label.as_deref(), entry.if_match.as_deref(), &cancel)
                .await?;
            print_item(&kv, None)
        }
    }
}

async fn execute_set(store: &KeyValueStore, args: SetArgs, cancel: &CancelSignal) -> CliResult {
    let mut kv = KeyValue::new(args.key, args.label.as_deref());
    if let Some(value) = args.value {
        kv = kv.with_value(value);
    }
    if let Some(content_type) = args.content_type {
        kv = kv.with_content_type(content_type);
    }
    for raw in &args.tags {
        let (name, value) = split_tag(raw);
        kv = kv.with_tag(name, value);
    }

    let written = store.set(kv, args.if_match.as_deref(), cancel).await?;
    print_item(&written, args.select.as_deref())
}

async fn execute_get(store: &KeyValueStore, args: GetArgs, cancel: &CancelSignal) -> CliResult {
    let current = store.get(&args.key, args.label.as_deref(), cancel).await?;

    if let Some(raw) = &args.if_none_match {
        let condition = EtagMatch::NoneMatch(EtagCondition::parse(raw));
        evaluate(&condition, current.as_ref().map(|kv| kv.etag.as_str())).into_result("kv_get")?;
    }

    let kv = current.ok_or_else(|| key_value_not_found("kv_get", &args.key, args.label.as_deref()))?;
    print_item(&kv, args.select.as_deref())
}
