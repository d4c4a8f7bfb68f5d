//! console_admin - offline administration of grants, audit records and migrations
//!
//! Every action that touches console data goes through the same gate and
//! forms as the HTTP API, acting as the principal named on the command line.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::actions::audit::{AuditPurgeForm, AuditPurgeRequest, SqliteAuditStore};
use crate::actions::migration::{previous_migrations, SqliteMigrationRecordStore};
use crate::capability::CapabilityDescriptor;
use crate::config::ConsoleConfig;
use crate::gate::{PageGate, RequestContext};
use crate::oracle::{AuthorizationOracle, Grant, PolicyFile, RoleGrantOracle, SqlitePermissionStore, Subject};
use crate::pages;
use crate::principal::Principal;
use crate::secure::SubmitOutcome;

#[derive(Parser, Debug)]
#[command(name = "console_admin", about = "Console permission and maintenance tool")]
struct Args {
    /// SQLite database holding grants, audit records and migrations
    #[arg(long, global = true, env = "CONSOLE_DB_PATH", default_value = "console.db")]
    db: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct SubjectArgs {
    /// Grant to every principal holding this role
    #[arg(long, conflicts_with = "principal", required_unless_present = "principal")]
    role: Option<String>,
    /// Grant to a single principal
    #[arg(long)]
    principal: Option<String>,
}

impl SubjectArgs {
    fn subject(&self) -> Result<Subject> {
        match (&self.role, &self.principal) {
            (Some(role), None) => Ok(Subject::role(role)),
            (None, Some(principal)) => Ok(Subject::principal(principal)),
            _ => Err(anyhow!("exactly one of --role or --principal is required")),
        }
    }
}

#[derive(clap::Args, Debug)]
struct CapabilityArgs {
    /// e.g. READ, READ_ALL, UPDATE_ANY, DELETE_ALL
    #[arg(long)]
    operation: String,
    /// e.g. AUDIT_RECORD, MIGRATION_RECORD, POLICY
    #[arg(long)]
    entity_type: String,
    #[arg(long)]
    entity_id: Option<String>,
}

impl CapabilityArgs {
    fn grant(&self) -> Result<Grant> {
        let grant = Grant::new(self.operation.parse()?, self.entity_type.parse()?);
        Ok(match self.entity_id.as_deref() {
            Some(id) => grant.for_entity(id),
            None => grant,
        })
    }

    fn descriptor(&self) -> Result<CapabilityDescriptor> {
        Ok(CapabilityDescriptor::new(
            self.operation.parse()?,
            self.entity_type.parse()?,
            self.entity_id.clone(),
        ))
    }
}

#[derive(clap::Args, Debug)]
struct ActorArgs {
    /// Principal to act as
    #[arg(long = "as")]
    actor: String,
    /// Comma-separated roles of the acting principal
    #[arg(long, default_value = "")]
    roles: String,
}

impl ActorArgs {
    fn principal(&self) -> Result<Principal> {
        Ok(Principal::new(&self.actor)?.with_roles(
            self.roles
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty()),
        ))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a grant
    Grant {
        #[command(flatten)]
        subject: SubjectArgs,
        #[command(flatten)]
        capability: CapabilityArgs,
    },

    /// Remove a grant
    Revoke {
        #[command(flatten)]
        subject: SubjectArgs,
        #[command(flatten)]
        capability: CapabilityArgs,
    },

    /// Seed grants from a TOML policy file
    ImportPolicy {
        #[arg(long)]
        policy: PathBuf,
    },

    /// Ask the oracle whether a principal holds a capability
    Check {
        #[command(flatten)]
        actor: ActorArgs,
        #[command(flatten)]
        capability: CapabilityArgs,
    },

    /// Print the render plan of a console page
    Render {
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long)]
        page: String,
    },

    /// Delete audit records older than the given age
    PurgeAudit {
        #[command(flatten)]
        actor: ActorArgs,
        /// Defaults to `audit.default_min_age_days` from the console config
        #[arg(long)]
        min_age_days: Option<i64>,
    },

    /// List named migrations visible to the principal
    Migrations {
        #[command(flatten)]
        actor: ActorArgs,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
}

pub fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Command::Grant {
            subject,
            capability,
        } => cmd_grant(&args.db, &subject, &capability),
        Command::Revoke {
            subject,
            capability,
        } => cmd_revoke(&args.db, &subject, &capability),
        Command::ImportPolicy { policy } => cmd_import_policy(&args.db, &policy),
        Command::Check { actor, capability } => cmd_check(&args.db, &actor, &capability),
        Command::Render { actor, page } => cmd_render(&args.db, &actor, &page),
        Command::PurgeAudit {
            actor,
            min_age_days,
        } => cmd_purge_audit(&args.db, &actor, min_age_days),
        Command::Migrations { actor, limit } => cmd_migrations(&args.db, &actor, limit),
    }
}

fn oracle(db_path: &str) -> Result<RoleGrantOracle<SqlitePermissionStore>> {
    Ok(RoleGrantOracle::new(SqlitePermissionStore::open(db_path)?))
}

fn cmd_grant(db_path: &str, subject: &SubjectArgs, capability: &CapabilityArgs) -> Result<()> {
    let store = SqlitePermissionStore::open(db_path)?;
    let subject = subject.subject()?;
    let grant = capability.grant()?;
    store.grant(&subject, &grant)?;
    println!("granted {} {}", subject_label(&subject), grant_label(&grant));
    Ok(())
}

fn cmd_revoke(db_path: &str, subject: &SubjectArgs, capability: &CapabilityArgs) -> Result<()> {
    let store = SqlitePermissionStore::open(db_path)?;
    let subject = subject.subject()?;
    let grant = capability.grant()?;
    if store.revoke(&subject, &grant)? {
        println!("revoked {} {}", subject_label(&subject), grant_label(&grant));
    } else {
        println!("no such grant for {}", subject_label(&subject));
    }
    Ok(())
}

fn cmd_import_policy(db_path: &str, policy: &std::path::Path) -> Result<()> {
    let store = SqlitePermissionStore::open(db_path)?;
    let count = PolicyFile::read(policy)?.apply_to(&store)?;
    println!("applied {} grants from {}", count, policy.display());
    Ok(())
}

fn cmd_check(db_path: &str, actor: &ActorArgs, capability: &CapabilityArgs) -> Result<()> {
    let oracle = oracle(db_path)?;
    let principal = actor.principal()?;
    let descriptor = capability.descriptor()?;
    let decision = oracle.check(&principal, Some(&descriptor));
    println!(
        "{} {} {}",
        principal.id(),
        if decision.allowed { "MAY" } else { "MAY NOT" },
        descriptor
    );
    if let Some(reason) = decision.reason {
        println!("reason: {}", serde_json::to_string(&reason)?);
    }
    Ok(())
}

fn cmd_render(db_path: &str, actor: &ActorArgs, page_name: &str) -> Result<()> {
    let page = pages::page_by_name(page_name)?.ok_or_else(|| {
        anyhow!(
            "unknown page '{}' (expected one of {})",
            page_name,
            pages::PAGE_NAMES.join(", ")
        )
    })?;
    let oracle = oracle(db_path)?;
    let principal = actor.principal()?;
    let plan = PageGate::render_pass(&page, RequestContext::new(&oracle, &principal));
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn cmd_purge_audit(db_path: &str, actor: &ActorArgs, min_age_days: Option<i64>) -> Result<()> {
    let min_age_days = match min_age_days {
        Some(days) => days,
        None => ConsoleConfig::load()?.audit_default_min_age_days,
    };
    let oracle = oracle(db_path)?;
    let principal = actor.principal()?;
    let ctx = RequestContext::new(&oracle, &principal);
    let page = pages::audit_settings_page()?;
    let store = SqliteAuditStore::open(db_path)?;

    let outcome = PageGate::dispatch(&page, pages::AUDIT_PURGE_TARGET, ctx, || {
        AuditPurgeForm::secured(store).submit(
            ctx,
            AuditPurgeRequest {
                min_age_days: Some(min_age_days),
            },
        )
    })?;
    match outcome {
        SubmitOutcome::Accepted { output, .. } => match output.deleted {
            Some(n) => println!("deleted {} audit records older than {} days", n, min_age_days),
            None => println!("purge requested; see log for store errors"),
        },
        SubmitOutcome::Rejected(feedback) => {
            for message in feedback.messages() {
                eprintln!("{}", message.message);
            }
            return Err(anyhow!("purge request rejected"));
        }
    }
    Ok(())
}

fn cmd_migrations(db_path: &str, actor: &ActorArgs, limit: usize) -> Result<()> {
    let oracle = oracle(db_path)?;
    let principal = actor.principal()?;
    let ctx = RequestContext::new(&oracle, &principal);
    let page = pages::policy_migration_page()?;
    let store = SqliteMigrationRecordStore::open(db_path)?;

    let listed = PageGate::dispatch(&page, pages::PREVIOUS_MIGRATIONS_TARGET, ctx, || {
        previous_migrations(ctx, &store, limit)
    })?;
    if listed.is_empty() {
        println!("no named migrations");
    }
    for migration in listed {
        println!("{:>6}  {}", migration.id, migration.name);
    }
    Ok(())
}

fn subject_label(subject: &Subject) -> String {
    match subject {
        Subject::Role(name) => format!("role:{}", name),
        Subject::Principal(name) => format!("principal:{}", name),
    }
}

fn grant_label(grant: &Grant) -> String {
    match &grant.entity_id {
        Some(id) => format!("{} {}#{}", grant.operation, grant.entity_type, id),
        None => format!("{} {}", grant.operation, grant.entity_type),
    }
}
