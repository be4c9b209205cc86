use anyhow::bail;
use clap::{Parser, Subcommand};
use ezid::{ClaimPolicy, Destination};
use ezid_daemon_core::{BinderConfig, CrossrefConfig, DataciteConfig, SearchConfig};
use std::{collections::BTreeMap, path::PathBuf, time::Duration};

/// Default minter mask for newly created shoulders.
pub const DEFAULT_MASK: &str = "eedk";

/// Runtime configuration for the `ezid-daemon` binary.
///
/// Every setting can be given as a flag or through the environment (a `.env`
/// file in the working directory is loaded first). Settings are validated
/// into a [`DaemonConfig`] only for `run`; the admin subcommands read just the
/// database and minter locations.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ezid-daemon",
    version,
    about = "Propagates EZID identifiers to external services, checks their targets and sweeps expired state"
)]
pub struct CliArgs {
    #[command(flatten)]
    pub settings: Settings,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start every enabled component and run until SIGINT/SIGTERM (default).
    Run,
    /// Create, mint from, or import shoulder minters.
    #[command(subcommand)]
    Minter(MinterCommand),
    /// Inspect and repair destination queues.
    #[command(subcommand)]
    Queue(QueueCommand),
}

#[derive(Subcommand, Debug, Clone)]
pub enum MinterCommand {
    /// Create a fresh minter for a shoulder, e.g. `ark:/99999/fk4`.
    Create {
        shoulder: String,
        #[arg(long, default_value = DEFAULT_MASK)]
        mask: String,
    },
    /// Mint identifiers and print them, one per line.
    Mint {
        shoulder: String,
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
        /// Print what would be minted without saving the minter state.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Import a legacy JSON minter dump (keys prefixed with `:/`).
    Import { path: PathBuf, shoulder: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum QueueCommand {
    /// Print the rows of one destination queue.
    List { destination: Destination },
    /// Make a permanently failed row retryable again.
    Clear { destination: Destination, seq: u64 },
}

#[derive(clap::Args, Debug, Clone)]
pub struct Settings {
    /// Path of the SQLite identifier store.
    ///
    /// Environment variable: `DATABASE_PATH`
    #[arg(long, env = "DATABASE_PATH", default_value = "ezid.sqlite3")]
    pub database_path: PathBuf,

    /// Directory holding one JSON state file per shoulder minter.
    ///
    /// Environment variable: `MINTER_ROOT`
    #[arg(long, env = "MINTER_ROOT", default_value = "minters")]
    pub minter_root: PathBuf,

    /// Identifier prefixes treated as test identifiers (comma separated).
    ///
    /// Environment variable: `TEST_PREFIXES`
    #[arg(
        long,
        env = "TEST_PREFIXES",
        value_delimiter = ',',
        default_value = "ark:/99999/fk4,doi:10.5072/FK2"
    )]
    pub test_prefixes: Vec<String>,

    /// Whole-request timeout for destination calls, in seconds.
    ///
    /// Environment variable: `REMOTE_TIMEOUT`
    #[arg(long, env = "REMOTE_TIMEOUT", default_value_t = 60)]
    pub remote_timeout: u64,

    /// Seconds to wait for in-flight rows during shutdown.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 10)]
    pub shutdown_timeout: u64,

    /// Environment variable: `BINDER_ENABLED`
    #[arg(long, env = "BINDER_ENABLED", default_value_t = false)]
    pub binder_enabled: bool,

    /// Egg endpoint of the N2T binder.
    ///
    /// Environment variable: `BINDER_URL`
    #[arg(long, env = "BINDER_URL")]
    pub binder_url: Option<String>,

    /// Environment variable: `BINDER_USERNAME`
    #[arg(long, env = "BINDER_USERNAME", default_value = "")]
    pub binder_username: String,

    /// Environment variable: `BINDER_PASSWORD`
    #[arg(long, env = "BINDER_PASSWORD", default_value = "", hide_env_values = true)]
    pub binder_password: String,

    /// Environment variable: `DATACITE_ENABLED`
    #[arg(long, env = "DATACITE_ENABLED", default_value_t = false)]
    pub datacite_enabled: bool,

    /// Base URL of the DataCite MDS API.
    ///
    /// Environment variable: `DATACITE_URL`
    #[arg(long, env = "DATACITE_URL")]
    pub datacite_url: Option<String>,

    /// Allocator passwords as `ALLOCATOR=password` pairs, comma separated.
    ///
    /// Environment variable: `DATACITE_ALLOCATOR_PASSWORDS`
    #[arg(
        long,
        env = "DATACITE_ALLOCATOR_PASSWORDS",
        default_value = "",
        hide_env_values = true
    )]
    pub datacite_allocator_passwords: String,

    /// Environment variable: `CROSSREF_ENABLED`
    #[arg(long, env = "CROSSREF_ENABLED", default_value_t = false)]
    pub crossref_enabled: bool,

    /// Deposit endpoint (`.../servlet/deposit`).
    ///
    /// Environment variable: `CROSSREF_DEPOSIT_URL`
    #[arg(long, env = "CROSSREF_DEPOSIT_URL")]
    pub crossref_deposit_url: Option<String>,

    /// Submission results endpoint (`.../servlet/submissionDownload`).
    ///
    /// Environment variable: `CROSSREF_RESULTS_URL`
    #[arg(long, env = "CROSSREF_RESULTS_URL")]
    pub crossref_results_url: Option<String>,

    /// Environment variable: `CROSSREF_USERNAME`
    #[arg(long, env = "CROSSREF_USERNAME", default_value = "")]
    pub crossref_username: String,

    /// Environment variable: `CROSSREF_PASSWORD`
    #[arg(long, env = "CROSSREF_PASSWORD", default_value = "", hide_env_values = true)]
    pub crossref_password: String,

    /// Environment variable: `CROSSREF_DEPOSITOR_NAME`
    #[arg(long, env = "CROSSREF_DEPOSITOR_NAME", default_value = "EZID")]
    pub crossref_depositor_name: String,

    /// Environment variable: `CROSSREF_DEPOSITOR_EMAIL`
    #[arg(long, env = "CROSSREF_DEPOSITOR_EMAIL", default_value = "")]
    pub crossref_depositor_email: String,

    /// Seconds between polls of deposits awaiting a result.
    ///
    /// Environment variable: `CROSSREF_POLL_INTERVAL`
    #[arg(long, env = "CROSSREF_POLL_INTERVAL", default_value_t = 300)]
    pub crossref_poll_interval: u64,

    /// Environment variable: `SEARCH_ENABLED`
    #[arg(long, env = "SEARCH_ENABLED", default_value_t = false)]
    pub search_enabled: bool,

    /// Base URL of the search index cluster.
    ///
    /// Environment variable: `SEARCH_URL`
    #[arg(long, env = "SEARCH_URL")]
    pub search_url: Option<String>,

    /// Environment variable: `SEARCH_INDEX`
    #[arg(long, env = "SEARCH_INDEX", default_value = "ezid")]
    pub search_index: String,

    /// Environment variable: `SEARCH_USERNAME`
    #[arg(long, env = "SEARCH_USERNAME")]
    pub search_username: Option<String>,

    /// Environment variable: `SEARCH_PASSWORD`
    #[arg(long, env = "SEARCH_PASSWORD", hide_env_values = true)]
    pub search_password: Option<String>,

    /// Worker tasks per enabled destination.
    ///
    /// Environment variable: `QUEUE_WORKERS`
    #[arg(long, env = "QUEUE_WORKERS", default_value_t = 2)]
    pub queue_workers: usize,

    /// Rows claimed per destination per pass.
    ///
    /// Environment variable: `QUEUE_BATCH_SIZE`
    #[arg(long, env = "QUEUE_BATCH_SIZE", default_value_t = 100)]
    pub queue_batch_size: usize,

    /// Seconds a destination sleeps after a pass that found nothing to do.
    ///
    /// Environment variable: `QUEUE_IDLE_SLEEP`
    #[arg(long, env = "QUEUE_IDLE_SLEEP", default_value_t = 5)]
    pub queue_idle_sleep: u64,

    /// Minimum seconds between two attempts at a transiently failed row.
    ///
    /// Environment variable: `QUEUE_RETRY_INTERVAL`
    #[arg(long, env = "QUEUE_RETRY_INTERVAL", default_value_t = 300)]
    pub queue_retry_interval: u64,

    /// Failed rows enqueued longer ago than this many seconds are not retried.
    ///
    /// Environment variable: `QUEUE_MAX_RETRY_AGE`
    #[arg(long, env = "QUEUE_MAX_RETRY_AGE", default_value_t = 86_400)]
    pub queue_max_retry_age: u64,

    /// Seconds after which a submitted row without a result is claimed again.
    ///
    /// Environment variable: `QUEUE_CLAIM_TIMEOUT`
    #[arg(long, env = "QUEUE_CLAIM_TIMEOUT", default_value_t = 3_600)]
    pub queue_claim_timeout: u64,

    /// Environment variable: `EXPUNGE_ENABLED`
    #[arg(long, env = "EXPUNGE_ENABLED", default_value_t = false)]
    pub expunge_enabled: bool,

    /// Seconds between expunge passes.
    ///
    /// Environment variable: `EXPUNGE_INTERVAL`
    #[arg(long, env = "EXPUNGE_INTERVAL", default_value_t = 3_600)]
    pub expunge_interval: u64,

    /// Environment variable: `EXPUNGE_BATCH_SIZE`
    #[arg(long, env = "EXPUNGE_BATCH_SIZE", default_value_t = 100)]
    pub expunge_batch_size: usize,

    /// Test identifiers younger than this many seconds are kept.
    ///
    /// Environment variable: `EXPUNGE_MAX_AGE`
    #[arg(long, env = "EXPUNGE_MAX_AGE", default_value_t = 14 * 86_400)]
    pub expunge_max_age: u64,

    /// Width in seconds of the scan window ending at `now - EXPUNGE_MAX_AGE`.
    /// Zero scans everything older than the max age.
    ///
    /// Environment variable: `EXPUNGE_WINDOW`
    #[arg(long, env = "EXPUNGE_WINDOW", default_value_t = 0)]
    pub expunge_window: u64,

    /// Environment variable: `CLEANUP_ENABLED`
    #[arg(long, env = "CLEANUP_ENABLED", default_value_t = false)]
    pub cleanup_enabled: bool,

    /// Seconds between queue cleanup passes.
    ///
    /// Environment variable: `CLEANUP_INTERVAL`
    #[arg(long, env = "CLEANUP_INTERVAL", default_value_t = 3_600)]
    pub cleanup_interval: u64,

    /// Terminal rows must be at least this many seconds old to be deleted.
    ///
    /// Environment variable: `CLEANUP_MIN_AGE`
    #[arg(long, env = "CLEANUP_MIN_AGE", default_value_t = 3_600)]
    pub cleanup_min_age: u64,

    /// Environment variable: `CLEANUP_BATCH_SIZE`
    #[arg(long, env = "CLEANUP_BATCH_SIZE", default_value_t = 1_000)]
    pub cleanup_batch_size: usize,

    /// Environment variable: `LINKCHECK_ENABLED`
    #[arg(long, env = "LINKCHECK_ENABLED", default_value_t = false)]
    pub linkcheck_enabled: bool,

    /// Seconds between rebuilds of the link check table.
    ///
    /// Environment variable: `LINKCHECK_TABLE_UPDATE_CYCLE`
    #[arg(long, env = "LINKCHECK_TABLE_UPDATE_CYCLE", default_value_t = 604_800)]
    pub linkcheck_table_update_cycle: u64,

    /// Seconds between copies of link state into the identifier store.
    ///
    /// Environment variable: `LINKCHECK_RESULTS_UPLOAD_CYCLE`
    #[arg(long, env = "LINKCHECK_RESULTS_UPLOAD_CYCLE", default_value_t = 3_600)]
    pub linkcheck_results_upload_cycle: u64,

    /// Environment variable: `LINKCHECK_GOOD_RECHECK_MIN_INTERVAL`
    #[arg(
        long,
        env = "LINKCHECK_GOOD_RECHECK_MIN_INTERVAL",
        default_value_t = 30 * 86_400
    )]
    pub linkcheck_good_recheck_min_interval: u64,

    /// Environment variable: `LINKCHECK_BAD_RECHECK_MIN_INTERVAL`
    #[arg(long, env = "LINKCHECK_BAD_RECHECK_MIN_INTERVAL", default_value_t = 86_400)]
    pub linkcheck_bad_recheck_min_interval: u64,

    /// Minimum seconds between two checks against the same owner.
    ///
    /// Environment variable: `LINKCHECK_OWNER_REVISIT_MIN_INTERVAL`
    #[arg(long, env = "LINKCHECK_OWNER_REVISIT_MIN_INTERVAL", default_value_t = 5)]
    pub linkcheck_owner_revisit_min_interval: u64,

    /// Consecutive failures after which an identifier's link is reported broken.
    ///
    /// Environment variable: `LINKCHECK_NOTIFICATION_THRESHOLD`
    #[arg(long, env = "LINKCHECK_NOTIFICATION_THRESHOLD", default_value_t = 7)]
    pub linkcheck_notification_threshold: u32,

    /// Environment variable: `LINKCHECK_WORKERS`
    #[arg(long, env = "LINKCHECK_WORKERS", default_value_t = 6)]
    pub linkcheck_workers: usize,

    /// Rows checked per owner per round.
    ///
    /// Environment variable: `LINKCHECK_WORKSET_OWNER_MAX_LINKS`
    #[arg(long, env = "LINKCHECK_WORKSET_OWNER_MAX_LINKS", default_value_t = 500)]
    pub linkcheck_workset_owner_max_links: usize,

    /// Environment variable: `LINKCHECK_CHECK_TIMEOUT`
    #[arg(long, env = "LINKCHECK_CHECK_TIMEOUT", default_value_t = 30)]
    pub linkcheck_check_timeout: u64,

    /// Environment variable: `LINKCHECK_USER_AGENT`
    #[arg(
        long,
        env = "LINKCHECK_USER_AGENT",
        default_value = "EZID (EZID link checker; https://ezid.cdlib.org/)"
    )]
    pub linkcheck_user_agent: String,

    /// Maximum bytes read from a target, in bytes.
    ///
    /// Environment variable: `LINKCHECK_MAX_READ`
    #[arg(long, env = "LINKCHECK_MAX_READ", default_value_t = 100 * 1024 * 1024)]
    pub linkcheck_max_read: usize,

    /// File listing owners excluded from checking (`owner permanent|temporary`).
    ///
    /// Environment variable: `LINKCHECK_EXCLUSION_FILE`
    #[arg(long, env = "LINKCHECK_EXCLUSION_FILE")]
    pub linkcheck_exclusion_file: Option<PathBuf>,

    /// Seconds the checker sleeps after a round with nothing to check.
    ///
    /// Environment variable: `LINKCHECK_IDLE_SLEEP`
    #[arg(long, env = "LINKCHECK_IDLE_SLEEP", default_value_t = 60)]
    pub linkcheck_idle_sleep: u64,
}

/// Settings shared by every destination queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub workers: usize,
    pub batch_size: usize,
    pub idle_sleep: Duration,
    pub policy: ClaimPolicy,
    /// How often rows awaiting a result are polled.
    pub poll_interval: Duration,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ExpungeConfig {
    pub interval: Duration,
    pub batch_size: usize,
    pub max_age: u64,
    pub window: u64,
    pub test_prefixes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub interval: Duration,
    pub min_age: u64,
    pub batch_size: usize,
}

#[derive(Debug, Clone)]
pub struct LinkCheckConfig {
    pub table_update_cycle: u64,
    pub results_upload_cycle: u64,
    pub good_recheck_min_interval: u64,
    pub bad_recheck_min_interval: u64,
    pub owner_revisit_min_interval: Duration,
    pub notification_threshold: u32,
    pub workers: usize,
    pub owner_max_links: usize,
    pub check_timeout: Duration,
    pub user_agent: String,
    pub max_read: usize,
    pub exclusion_file: Option<PathBuf>,
    pub idle_sleep: Duration,
}

/// Validated configuration for `ezid-daemon run`. Disabled components are
/// `None`.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub database_path: PathBuf,
    pub remote_timeout: Duration,
    pub binder: Option<BinderConfig>,
    pub datacite: Option<DataciteConfig>,
    pub crossref: Option<CrossrefConfig>,
    pub search: Option<SearchConfig>,
    pub queue: QueueConfig,
    pub expunge: Option<ExpungeConfig>,
    pub cleanup: Option<CleanupConfig>,
    pub linkcheck: Option<LinkCheckConfig>,
}

impl DaemonConfig {
    /// Destinations whose queues this daemon drains.
    pub fn enabled_destinations(&self) -> Vec<Destination> {
        let mut out = Vec::with_capacity(Destination::ALL.len());
        if self.binder.is_some() {
            out.push(Destination::Binder);
        }
        if self.datacite.is_some() {
            out.push(Destination::Datacite);
        }
        if self.crossref.is_some() {
            out.push(Destination::Crossref);
        }
        if self.search.is_some() {
            out.push(Destination::SearchIndexer);
        }
        out
    }
}

impl TryFrom<Settings> for DaemonConfig {
    type Error = anyhow::Error;

    fn try_from(args: Settings) -> Result<Self, Self::Error> {
        if args.queue_workers == 0 {
            bail!("QUEUE_WORKERS must be greater than 0");
        }
        if args.queue_batch_size == 0 {
            bail!("QUEUE_BATCH_SIZE must be greater than 0");
        }

        let binder = if args.binder_enabled {
            Some(BinderConfig {
                url: required_url(args.binder_url, "BINDER_URL")?,
                username: args.binder_username,
                password: args.binder_password,
            })
        } else {
            None
        };

        // Parsed even when disabled so a typo is caught before it is needed.
        let allocator_passwords = parse_allocator_passwords(&args.datacite_allocator_passwords)?;
        let datacite = if args.datacite_enabled {
            Some(DataciteConfig {
                url: required_url(args.datacite_url, "DATACITE_URL")?,
                allocator_passwords,
            })
        } else {
            None
        };

        let crossref = if args.crossref_enabled {
            Some(CrossrefConfig {
                deposit_url: required_url(args.crossref_deposit_url, "CROSSREF_DEPOSIT_URL")?,
                results_url: required_url(args.crossref_results_url, "CROSSREF_RESULTS_URL")?,
                username: args.crossref_username,
                password: args.crossref_password,
                depositor_name: args.crossref_depositor_name,
                depositor_email: args.crossref_depositor_email,
            })
        } else {
            None
        };

        let search = if args.search_enabled {
            Some(SearchConfig {
                url: required_url(args.search_url, "SEARCH_URL")?,
                index: args.search_index,
                username: args.search_username,
                password: args.search_password,
            })
        } else {
            None
        };

        let test_prefixes: Vec<String> = args
            .test_prefixes
            .into_iter()
            .map(|p| p.trim().to_owned())
            .filter(|p| !p.is_empty())
            .collect();

        let expunge = if args.expunge_enabled {
            if args.expunge_batch_size == 0 {
                bail!("EXPUNGE_BATCH_SIZE must be greater than 0");
            }
            if test_prefixes.is_empty() {
                bail!("EXPUNGE_ENABLED requires at least one TEST_PREFIXES entry");
            }
            Some(ExpungeConfig {
                interval: Duration::from_secs(args.expunge_interval),
                batch_size: args.expunge_batch_size,
                max_age: args.expunge_max_age,
                window: args.expunge_window,
                test_prefixes,
            })
        } else {
            None
        };

        let cleanup = if args.cleanup_enabled {
            if args.cleanup_batch_size == 0 {
                bail!("CLEANUP_BATCH_SIZE must be greater than 0");
            }
            Some(CleanupConfig {
                interval: Duration::from_secs(args.cleanup_interval),
                min_age: args.cleanup_min_age,
                batch_size: args.cleanup_batch_size,
            })
        } else {
            None
        };

        let linkcheck = if args.linkcheck_enabled {
            if args.linkcheck_workers == 0 {
                bail!("LINKCHECK_WORKERS must be greater than 0");
            }
            if args.linkcheck_workset_owner_max_links == 0 {
                bail!("LINKCHECK_WORKSET_OWNER_MAX_LINKS must be greater than 0");
            }
            if args.linkcheck_notification_threshold == 0 {
                bail!("LINKCHECK_NOTIFICATION_THRESHOLD must be greater than 0");
            }
            Some(LinkCheckConfig {
                table_update_cycle: args.linkcheck_table_update_cycle,
                results_upload_cycle: args.linkcheck_results_upload_cycle,
                good_recheck_min_interval: args.linkcheck_good_recheck_min_interval,
                bad_recheck_min_interval: args.linkcheck_bad_recheck_min_interval,
                owner_revisit_min_interval: Duration::from_secs(
                    args.linkcheck_owner_revisit_min_interval,
                ),
                notification_threshold: args.linkcheck_notification_threshold,
                workers: args.linkcheck_workers,
                owner_max_links: args.linkcheck_workset_owner_max_links,
                check_timeout: Duration::from_secs(args.linkcheck_check_timeout),
                user_agent: args.linkcheck_user_agent,
                max_read: args.linkcheck_max_read,
                exclusion_file: args.linkcheck_exclusion_file,
                idle_sleep: Duration::from_secs(args.linkcheck_idle_sleep),
            })
        } else {
            None
        };

        Ok(Self {
            database_path: args.database_path,
            remote_timeout: Duration::from_secs(args.remote_timeout),
            binder,
            datacite,
            crossref,
            search,
            queue: QueueConfig {
                workers: args.queue_workers,
                batch_size: args.queue_batch_size,
                idle_sleep: Duration::from_secs(args.queue_idle_sleep),
                policy: ClaimPolicy {
                    retry_interval: args.queue_retry_interval,
                    max_retry_age: args.queue_max_retry_age,
                    claim_timeout: args.queue_claim_timeout,
                },
                poll_interval: Duration::from_secs(args.crossref_poll_interval),
                shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            },
            expunge,
            cleanup,
            linkcheck,
        })
    }
}

fn required_url(url: Option<String>, key: &str) -> anyhow::Result<String> {
    match url {
        Some(url) if !url.trim().is_empty() => Ok(url.trim().to_owned()),
        _ => bail!("{key} must be set when its destination is enabled"),
    }
}

/// Parses `ALLOC=secret,OTHER=secret2`. Allocator names are uppercased.
fn parse_allocator_passwords(raw: &str) -> anyhow::Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((allocator, password)) = pair.split_once('=') else {
            bail!("DATACITE_ALLOCATOR_PASSWORDS entry `{pair}` is not ALLOCATOR=password");
        };
        let allocator = allocator.trim();
        if allocator.is_empty() || password.is_empty() {
            bail!("DATACITE_ALLOCATOR_PASSWORDS entry `{pair}` is not ALLOCATOR=password");
        }
        if out
            .insert(allocator.to_ascii_uppercase(), password.to_owned())
            .is_some()
        {
            bail!("DATACITE_ALLOCATOR_PASSWORDS lists allocator `{allocator}` twice");
        }
    }
    Ok(out)
}
