mod json_input;

use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use directories::ProjectDirs;
use serde_json::{Value, json};
use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use meta_ads::auth::{ACCESS_TOKEN_ENV, AD_ACCOUNT_ID_ENV};
use meta_ads::insights::DEFAULT_FIELDS;
use meta_ads::{
    ClientOptions, ConnectOutcome, CredentialResolver, CredentialStore, DEFAULT_BASE_URL, DateRange,
    FileCredentialStore, FileLocalStorage, HttpCredentialStore, Level, ReportRequest,
    RuntimeConfig, redact_token,
};

use json_input::read_filter_rules;

const ENDPOINT_ENV: &str = "META_GRAPH_ENDPOINT";
const STORE_URL_ENV: &str = "META_CREDENTIALS_URL";
const STATE_DIR_ENV: &str = "META_ADS_STATE_DIR";

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let matches = build_cli().get_matches();
    let config = load_config(&matches)?;
    let mut resolver = build_resolver(&config)?;
    let pretty = matches.get_flag("pretty");

    let (name, sub) = matches
        .subcommand()
        .ok_or_else(|| anyhow!("command required"))?;

    match name {
        "connect" => return handle_connect(&mut resolver, &config, sub, pretty).await,
        "disconnect" => return handle_disconnect(&mut resolver, pretty).await,
        "status" => {
            resolver.initialize().await;
            return write_json(&status_json(&resolver), pretty);
        }
        _ => {}
    }

    resolver.initialize().await;
    let client = resolver.require_client()?;

    let output = match name {
        "account" => client.get_account().await?,
        "insights" => {
            let mut request = read_report_request(sub)?;
            request.level = sub
                .get_one::<String>("level")
                .map(|v| v.parse::<Level>())
                .transpose()?;
            request.filtering = sub
                .get_one::<String>("filter")
                .map(|v| read_filter_rules(v))
                .transpose()?;
            request.limit = sub.get_one::<u32>("limit").copied();
            client.get_insights(&request).await?
        }
        "campaigns" => client.get_campaigns().await?,
        "campaign" => {
            let id = required(sub, "campaign_id")?;
            client.get_campaign_details(id).await?
        }
        "adsets" => {
            let campaign_id = sub.get_one::<String>("campaign_id").map(String::as_str);
            client.get_ad_sets(campaign_id).await?
        }
        "adset-insights" => {
            let id = required(sub, "adset_id")?;
            let request = read_report_request(sub)?;
            client.get_ad_set_insights(id, &request).await?
        }
        "ads" => client.get_ads().await?,
        other => return Err(anyhow!("unknown command {other}")),
    };

    write_json(&output, pretty)
}

async fn handle_connect(
    resolver: &mut CredentialResolver,
    config: &Config,
    matches: &ArgMatches,
    pretty: bool,
) -> Result<()> {
    if matches.get_flag("use_default") {
        if !resolver.use_default_credentials().await {
            return Err(anyhow!(
                "no default credentials: set {ACCESS_TOKEN_ENV} and {AD_ACCOUNT_ID_ENV}"
            ));
        }
        return write_json(&status_json(resolver), pretty);
    }

    let (access_token, ad_account_id) = connect_values(&config.runtime)?;
    match resolver.connect(access_token, ad_account_id).await {
        ConnectOutcome::Connected => {}
        ConnectOutcome::ConnectedUnsaved(err) => {
            eprintln!("warning: connected, but credentials were not saved: {err}");
        }
        ConnectOutcome::Rejected(err) => return Err(anyhow!("connect failed: {err}")),
    }
    write_json(&status_json(resolver), pretty)
}

/// Flags win over the environment; both were merged in `load_config`.
fn connect_values(runtime: &RuntimeConfig) -> Result<(&str, &str)> {
    let access_token = runtime
        .access_token
        .as_deref()
        .ok_or_else(|| anyhow!("--access-token or {ACCESS_TOKEN_ENV} required"))?;
    let ad_account_id = runtime
        .ad_account_id
        .as_deref()
        .ok_or_else(|| anyhow!("--ad-account-id or {AD_ACCOUNT_ID_ENV} required"))?;
    Ok((access_token, ad_account_id))
}

async fn handle_disconnect(resolver: &mut CredentialResolver, pretty: bool) -> Result<()> {
    if let Err(err) = resolver.disconnect().await {
        eprintln!("warning: {err}");
    }
    write_json(&status_json(resolver), pretty)
}

fn status_json(resolver: &CredentialResolver) -> Value {
    let state = resolver.state();
    let mut value = json!({
        "status": state.status,
        "isConnected": state.is_connected(),
        "loading": state.loading,
        "error": state.error,
    });
    if let Some(credentials) = resolver.credentials() {
        value["origin"] = json!(resolver.origin().map(|o| o.to_string()));
        value["adAccountId"] = json!(format!("act_{}", credentials.ad_account_id));
        value["accessToken"] = json!(redact_token(&credentials.access_token));
    }
    value
}

fn build_cli() -> Command {
    let mut cmd = Command::new("meta-ads")
        .about("Meta Marketing API CLI: accounts, campaigns, ad sets, ads and insights")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("pretty")
                .long("pretty")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Pretty-print JSON output"),
        )
        .arg(
            Arg::new("access_token")
                .long("access-token")
                .global(true)
                .value_name("TOKEN")
                .help("Access token (env: META_ACCESS_TOKEN)"),
        )
        .arg(
            Arg::new("ad_account_id")
                .long("ad-account-id")
                .global(true)
                .value_name("ID")
                .help("Ad account id, with or without act_ (env: META_AD_ACCOUNT_ID)"),
        )
        .arg(
            Arg::new("endpoint")
                .long("endpoint")
                .global(true)
                .value_name("URL")
                .help("Graph API base url (env: META_GRAPH_ENDPOINT)"),
        )
        .arg(
            Arg::new("store_url")
                .long("store-url")
                .global(true)
                .value_name("URL")
                .help("Credentials API url; saves to a local file when unset (env: META_CREDENTIALS_URL)"),
        )
        .arg(
            Arg::new("state_dir")
                .long("state-dir")
                .global(true)
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .help("Directory for saved credentials (env: META_ADS_STATE_DIR)"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .global(true)
                .value_parser(value_parser!(u64))
                .help("Request timeout in seconds"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable debug logging"),
        );

    cmd = cmd
        .subcommand(
            Command::new("connect")
                .about("Adopt and save credentials (uses --access-token and --ad-account-id)")
                .arg(
                    Arg::new("use_default")
                        .long("use-default")
                        .action(ArgAction::SetTrue)
                        .help("Adopt META_ACCESS_TOKEN / META_AD_ACCOUNT_ID without saving"),
                ),
        )
        .subcommand(Command::new("disconnect").about("Forget saved credentials"))
        .subcommand(Command::new("status").about("Show which credentials would be used"));

    cmd = cmd
        .subcommand(Command::new("account").about("Ad account details"))
        .subcommand(report_args(
            Command::new("insights")
                .about("Account insights for a date range")
                .arg(
                    Arg::new("level")
                        .long("level")
                        .value_parser(Level::ALL)
                        .help("Aggregation level (default: account)"),
                )
                .arg(
                    Arg::new("filter")
                        .long("filter")
                        .value_name("JSON")
                        .help("Filter rule or array of rules (JSON or @file)"),
                )
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .value_parser(value_parser!(u32))
                        .help("Maximum rows (default: 100)"),
                ),
        ))
        .subcommand(Command::new("campaigns").about("List campaigns"))
        .subcommand(
            Command::new("campaign")
                .about("Campaign details including spend, impressions and reach")
                .arg(Arg::new("campaign_id").required(true).value_name("ID")),
        )
        .subcommand(
            Command::new("adsets").about("List ad sets").arg(
                Arg::new("campaign_id")
                    .long("campaign-id")
                    .value_name("ID")
                    .help("Only ad sets of this campaign"),
            ),
        )
        .subcommand(report_args(
            Command::new("adset-insights")
                .about("Insights for one ad set")
                .arg(Arg::new("adset_id").required(true).value_name("ID")),
        ))
        .subcommand(Command::new("ads").about("List ads"));

    cmd
}

fn report_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("since")
            .long("since")
            .value_name("YYYY-MM-DD")
            .help("Start date (default: 30 days ago)"),
    )
    .arg(
        Arg::new("until")
            .long("until")
            .value_name("YYYY-MM-DD")
            .help("End date (default: today)"),
    )
    .arg(
        Arg::new("fields")
            .long("fields")
            .value_name("LIST")
            .help("Comma-separated insight fields"),
    )
}

fn read_report_request(matches: &ArgMatches) -> Result<ReportRequest> {
    let mut range = DateRange::default();
    if let Some(since) = matches.get_one::<String>("since") {
        range.since = parse_date(since)?;
    }
    if let Some(until) = matches.get_one::<String>("until") {
        range.until = parse_date(until)?;
    }

    let fields = match matches.get_one::<String>("fields") {
        Some(list) => list.split(',').map(|f| f.trim().to_string()).collect(),
        None => DEFAULT_FIELDS.iter().map(|f| (*f).to_string()).collect(),
    };

    Ok(ReportRequest::new(range, fields))
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .with_context(|| format!("invalid date {value} (expected YYYY-MM-DD)"))
}

fn required<'a>(matches: &'a ArgMatches, id: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(id)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{id} required"))
}

fn write_json(value: &Value, pretty: bool) -> Result<()> {
    if pretty {
        write_stdout_line(&serde_json::to_string_pretty(value)?)?;
    } else {
        write_stdout_line(&serde_json::to_string(value)?)?;
    }
    Ok(())
}

fn write_stdout_line(line: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(line.as_bytes())?;
    stdout.write_all(b"\n")?;
    Ok(())
}

struct Config {
    runtime: RuntimeConfig,
    endpoint: String,
    store_url: Option<String>,
    state_dir: PathBuf,
    timeout: Option<Duration>,
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    if matches.get_flag("debug") {
        env_logger::Builder::from_env("RUST_LOG")
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_env("RUST_LOG")
            .filter_level(log::LevelFilter::Warn)
            .init();
    }

    let access_token = matches
        .get_one::<String>("access_token")
        .cloned()
        .or_else(|| env::var(ACCESS_TOKEN_ENV).ok());

    let ad_account_id = matches
        .get_one::<String>("ad_account_id")
        .cloned()
        .or_else(|| env::var(AD_ACCOUNT_ID_ENV).ok());

    let endpoint = matches
        .get_one::<String>("endpoint")
        .cloned()
        .or_else(|| env::var(ENDPOINT_ENV).ok())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    let store_url = matches
        .get_one::<String>("store_url")
        .cloned()
        .or_else(|| env::var(STORE_URL_ENV).ok())
        .filter(|url| !url.trim().is_empty());

    let state_dir = matches
        .get_one::<PathBuf>("state_dir")
        .cloned()
        .or_else(|| env::var_os(STATE_DIR_ENV).map(PathBuf::from))
        .or_else(|| ProjectDirs::from("com", "meta-ads", "meta-ads").map(|d| d.config_dir().to_path_buf()))
        .unwrap_or_else(|| PathBuf::from(".meta-ads"));

    let timeout = matches
        .get_one::<u64>("timeout")
        .copied()
        .map(Duration::from_secs);

    Ok(Config {
        runtime: RuntimeConfig {
            access_token,
            ad_account_id,
        },
        endpoint,
        store_url,
        state_dir,
        timeout,
    })
}

fn build_resolver(config: &Config) -> Result<CredentialResolver> {
    let store: Arc<dyn CredentialStore> = match config.store_url.as_deref() {
        Some(url) => Arc::new(HttpCredentialStore::new(url, config.timeout)?),
        None => Arc::new(FileCredentialStore::new(
            config.state_dir.join("credentials.json"),
        )),
    };
    let local = Arc::new(FileLocalStorage::new(config.state_dir.join("local.json")));

    Ok(CredentialResolver::new(
        config.runtime.clone(),
        store,
        local,
        ClientOptions {
            endpoint: config.endpoint.clone(),
            timeout: config.timeout,
        },
    ))
}
