use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use lcawrite_core::reference::{DEFAULT_URI_BASE, ReferenceResolver};
use lcawrite_core::{AuditLog, DocumentUpdater, FieldCatalog, LabelTable, RequirementBundle};
use lcawrite_store::{DEFAULT_RETRIES, ListFilter, MemoryStore, RecordStore, StoreSource};
use lcawrite_sync::HttpRecordStore;
use tracing::{info, warn};

mod workflow;

use workflow::{Workflow, WorkflowOptions};

/// Apply a requirement bundle to LCA process data sets.
#[derive(Parser, Debug)]
#[command(name = "lcawrite")]
#[command(version)]
struct Args {
    /// Requirement bundle (YAML)
    #[arg(long, env = "LCAWRITE_REQUIREMENT", required_unless_present = "list_labels")]
    requirement: Option<PathBuf>,

    /// Print every supported `ui_label` and exit
    #[arg(long)]
    list_labels: bool,

    /// Label translation table (`'key': 'label'` pairs)
    #[arg(long, env = "LCAWRITE_TRANSLATION")]
    translation: Option<PathBuf>,

    /// Field catalog replacing the built-in one
    #[arg(long, env = "LCAWRITE_FIELD_CATALOG")]
    field_catalog: Option<PathBuf>,

    /// Where the audit log is written (JSON Lines)
    #[arg(long, env = "LCAWRITE_AUDIT_LOG", default_value = "lcawrite-audit.jsonl")]
    audit_log: PathBuf,

    /// Also write each processed document here as `<id>.json`
    #[arg(long, env = "LCAWRITE_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Maximum documents per run; zero or negative processes all
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    limit: i64,

    /// Only documents owned by this user
    #[arg(long, env = "LCAWRITE_USER_ID")]
    user_id: Option<String>,

    /// Only documents in this state
    #[arg(long)]
    state_code: Option<i64>,

    #[arg(long, default_value = "processes")]
    table: String,

    #[arg(long, env = "LCAWRITE_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "LCAWRITE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Read and write `<dir>/<table>/<id>.json` instead of the remote tables
    #[arg(long, env = "LCAWRITE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Apply and audit without writing back
    #[arg(long)]
    dry_run: bool,

    /// Extra attempts for transient store failures
    #[arg(long, default_value_t = DEFAULT_RETRIES)]
    retries: usize,

    /// Base for generated reference URIs
    #[arg(long, default_value = DEFAULT_URI_BASE)]
    uri_base: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    info!("lcawrite v{}", env!("CARGO_PKG_VERSION"));

    let catalog = match &args.field_catalog {
        Some(path) => FieldCatalog::load(path)
            .with_context(|| format!("loading field catalog {}", path.display()))?,
        None => FieldCatalog::builtin().context("loading built-in field catalog")?,
    };
    if args.list_labels {
        print!("{}", label_listing(&catalog));
        return Ok(());
    }
    let Some(requirement) = &args.requirement else {
        bail!("--requirement is required");
    };

    let translations = match &args.translation {
        Some(path) => LabelTable::load(path)
            .with_context(|| format!("loading translations {}", path.display()))?,
        None => LabelTable::default(),
    };
    let bundle = RequirementBundle::load(requirement, &catalog)
        .with_context(|| format!("loading requirement {}", requirement.display()))?;
    if bundle.is_empty() {
        warn!(path = %requirement.display(), "requirement bundle has no rules");
    }

    let store = open_store(&args)?;
    let source = StoreSource::new(store.as_ref(), args.retries);
    let resolver = ReferenceResolver::new(&source).with_uri_base(&args.uri_base);
    let updater = DocumentUpdater::new(&translations, catalog.enums(), &resolver);

    let options = WorkflowOptions {
        filter: ListFilter {
            table: args.table.clone(),
            user_id: args.user_id.clone(),
            state_code: args.state_code,
            limit: usize::try_from(args.limit).ok().filter(|limit| *limit > 0),
        },
        dry_run: args.dry_run,
        retries: args.retries,
        output_dir: args.output_dir.clone(),
    };

    let mut audit = AuditLog::new();
    let summary = Workflow::new(store.as_ref(), &bundle, &updater, options).run(&mut audit);
    let flushed = audit
        .flush(&args.audit_log)
        .with_context(|| format!("writing audit log {}", args.audit_log.display()))?;
    let summary = summary?;

    info!(
        entries = flushed,
        needs_attention = audit.needs_attention().count(),
        path = %args.audit_log.display(),
        "audit log written"
    );
    println!(
        "attempted {}, updated {}, unchanged {}, failed {}",
        summary.attempted, summary.updated, summary.unchanged, summary.failed
    );
    Ok(())
}

/// One label per line, English aliases after a tab.
fn label_listing(catalog: &FieldCatalog) -> String {
    let mut out = String::new();
    for entry in catalog.labels() {
        out.push_str(&entry.label);
        if !entry.aliases.is_empty() {
            out.push('\t');
            out.push_str(&entry.aliases.join(", "));
        }
        out.push('\n');
    }
    out
}

fn open_store(args: &Args) -> Result<Box<dyn RecordStore>> {
    if let Some(dir) = &args.data_dir {
        let store = MemoryStore::load_dir(dir)
            .with_context(|| format!("loading records from {}", dir.display()))?;
        return Ok(Box::new(store));
    }
    let Some(base_url) = &args.base_url else {
        bail!("no record store: pass --data-dir or --base-url");
    };
    let store = HttpRecordStore::new(base_url, args.api_key.clone())
        .with_context(|| format!("connecting to {base_url}"))?;
    Ok(Box::new(store))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_labels_needs_no_requirement() {
        let args = Args::try_parse_from(["lcawrite", "--list-labels"]).unwrap();
        assert!(args.list_labels);
        assert!(args.requirement.is_none());
    }

    #[test]
    fn listing_prints_labels_with_aliases() {
        let catalog = FieldCatalog::builtin().unwrap();
        let listing = label_listing(&catalog);
        assert_eq!(listing.lines().count(), 14);
        assert!(listing.lines().any(|line| line == "许可类型\tLicense type"));
    }
}
