use anyhow::{anyhow, Context};
use clap::Parser;
use nimbus_common::Architecture;
use nimbus_providers::credentials::default_config_path;
use nimbus_providers::oci::OciCliProvider;
use nimbus_providers::{CredentialSource, ProfileCredentials, ProfileStore, ResolvedCredentials, StaticCredentials};
use nimbus_reprovision::console;
use nimbus_reprovision::context::ReprovisionContext;
use nimbus_reprovision::deps;
use nimbus_reprovision::error::{ReprovisionError, EXIT_FAILURE, EXIT_OK};
use nimbus_reprovision::instance_config;
use nimbus_reprovision::logging;
use nimbus_reprovision::profiles;
use nimbus_reprovision::prompt::{NonInteractivePrompter, Prompter, TerminalPrompter};
use nimbus_reprovision::settings::{session_timestamp, Paths};
use nimbus_reprovision::txlog::{SessionInfo, TransactionLog};
use nimbus_reprovision::workflow::{Outcome, Reprovisioner, STEP_CREDENTIALS};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "nimbus-reprovision")]
#[command(about = "Replace the boot volume of an OCI instance with a fresh image", long_about = None)]
struct Args {
    /// Profile name in the OCI config file
    #[arg(long, env = "OCI_PROFILE")]
    profile: Option<String>,

    /// Flat KEY=VALUE credentials file used instead of a profile
    #[arg(long, env = "OCI_CREDENTIALS_FILE")]
    credentials_file: Option<PathBuf>,

    #[arg(long, env = "COMPARTMENT_OCID")]
    compartment_id: Option<String>,

    #[arg(long, env = "INSTANCE_OCID")]
    instance_id: Option<String>,

    #[arg(long, env = "IMAGE_OCID")]
    image_id: Option<String>,

    /// Public key installed for the admin user
    #[arg(long)]
    ssh_key: Option<PathBuf>,

    /// Cloud-init template
    #[arg(long)]
    cloud_init: Option<PathBuf>,

    /// Force the architecture instead of deriving it from the shape (x86 or arm)
    #[arg(long, env = "ARCH")]
    arch: Option<String>,

    #[arg(long)]
    boot_volume_size_gb: Option<u64>,

    /// Extra template variable, KEY=VALUE (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE")]
    vars: Vec<String>,

    /// Do not preserve the old boot volume
    #[arg(long, default_value_t = false)]
    skip_backup: bool,

    /// Show the plan without changing anything
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Never prompt; fail when a choice has no default
    #[arg(long, default_value_t = false)]
    non_interactive: bool,

    /// Log level on stderr
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn parse_var(raw: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("--var expects KEY=VALUE, got '{}'", raw))?;
    let key = k.trim();
    if key.is_empty() {
        return Err(anyhow!("--var key cannot be empty"));
    }
    Ok((key.to_string(), v.to_string()))
}

fn context_from_args(args: &Args) -> anyhow::Result<ReprovisionContext> {
    let mut ctx = ReprovisionContext {
        profile: args.profile.clone().unwrap_or_default(),
        compartment_id: args.compartment_id.clone().unwrap_or_default(),
        instance_id: args.instance_id.clone().unwrap_or_default(),
        image_id: args.image_id.clone().unwrap_or_default(),
        ssh_public_key_path: args.ssh_key.clone(),
        cloud_init_template: args.cloud_init.clone(),
        boot_volume_size_gb: args.boot_volume_size_gb,
        skip_backup: args.skip_backup,
        dry_run: args.dry_run,
        non_interactive: args.non_interactive,
        ..Default::default()
    };
    if let Some(raw) = &args.arch {
        let arch: Architecture = raw.parse().map_err(|e| anyhow!("--arch: {}", e))?;
        ctx.architecture = Some(arch);
        ctx.arch_forced = true;
    }
    for raw in &args.vars {
        let (k, v) = parse_var(raw)?;
        ctx.extra_vars.insert(k, v);
    }
    Ok(ctx)
}

async fn resolve_credentials(
    args: &Args,
    prompter: &mut dyn Prompter,
    ctx: &mut ReprovisionContext,
) -> Result<ResolvedCredentials, ReprovisionError> {
    let source: Box<dyn CredentialSource> = match &args.credentials_file {
        Some(path) => Box::new(StaticCredentials::new(path)),
        None => {
            let store = ProfileStore::new(default_config_path());
            let profile = profiles::select_profile(&store, prompter, ctx).await?;
            Box::new(ProfileCredentials::new(store, profile.name))
        }
    };
    console::info(&format!("Using {}", source.describe()));
    let credentials = source
        .resolve()
        .map_err(|e| ReprovisionError::Auth(format!("{:#}", e)))?;
    ctx.tenancy_id = credentials.tenancy_id.clone();
    if ctx.region.is_empty() {
        ctx.region = credentials.region.clone();
    }
    Ok(credentials)
}

async fn run(args: Args, paths: Paths, session: &str) -> Result<Outcome, ReprovisionError> {
    let mut ctx = context_from_args(&args).map_err(|e| ReprovisionError::Precondition(e.to_string()))?;
    if instance_config::load(&paths.instance_config(), &mut ctx)? {
        console::info(&format!("Loaded saved choices from {}", paths.instance_config().display()));
    }

    let mut prompter: Box<dyn Prompter> = if args.non_interactive {
        Box::new(NonInteractivePrompter)
    } else {
        Box::new(TerminalPrompter::new())
    };

    let mut txlog = TransactionLog::begin(
        logging::json_log_path(&paths.logs_dir(), session),
        SessionInfo::current(session),
    )?;
    console::detail(&format!("Transaction log: {}", txlog.path().display()));

    txlog.step(STEP_CREDENTIALS.0, STEP_CREDENTIALS.1)?;
    let credentials = match resolve_credentials(&args, prompter.as_mut(), &mut ctx).await {
        Ok(credentials) => credentials,
        Err(e) => {
            if let Err(log_err) = txlog.abandon(&e) {
                tracing::warn!("could not finalize transaction log: {}", log_err);
            }
            return Err(e);
        }
    };

    let provider = Arc::new(OciCliProvider::new(credentials));
    let mut reprovisioner = Reprovisioner::new(provider, prompter, paths).with_txlog(txlog);
    reprovisioner.run(&mut ctx).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let paths = Paths::from_env();
    if let Err(e) = paths.ensure_dirs().context("creating local state directories") {
        console::error(&format!("{:#}", e));
        std::process::exit(EXIT_FAILURE);
    }
    let session = session_timestamp();
    let _guard = match logging::init(&paths.logs_dir(), &session, &args.log_level) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("⚠️  [Logging] {:#}", e);
            None
        }
    };
    tracing::info!("session {} started in {}", session, paths.root().display());

    if let Err(e) = deps::check(&deps::required_commands()) {
        report(&e);
        std::process::exit(e.exit_code());
    }

    let code = match run(args, paths, &session).await {
        Ok(Outcome::Completed(result)) => {
            tracing::info!("completed: new boot volume {:?}", result.new_boot_volume_id);
            EXIT_OK
        }
        Ok(Outcome::DryRun(_)) | Ok(Outcome::RestoredPrevious) => EXIT_OK,
        Err(e) => {
            report(&e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn report(err: &ReprovisionError) {
    if err.is_user_abort() {
        console::warn(&err.to_string());
        return;
    }
    console::error(&err.to_string());
    for hint in err.hints() {
        console::detail(&format!("→ {}", hint));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vars_need_a_key() {
        assert_eq!(parse_var("A=b=c").unwrap(), ("A".to_string(), "b=c".to_string()));
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn forced_arch_is_flagged() {
        let args = Args::parse_from(["nimbus-reprovision", "--arch", "arm64", "--dry-run", "--var", "TZ=UTC"]);
        let ctx = context_from_args(&args).unwrap();
        assert_eq!(ctx.architecture, Some(Architecture::Arm));
        assert!(ctx.arch_forced);
        assert!(ctx.dry_run);
        assert_eq!(ctx.extra_vars["TZ"], "UTC");
        let bad = Args::parse_from(["nimbus-reprovision", "--arch", "sparc"]);
        assert!(context_from_args(&bad).is_err());
    }
}
