mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;

use cli::{Cli, Commands};
use shelfkeeper::config::Settings;
use shelfkeeper::migrate::MigrateOptions;
use shelfkeeper::plugins::build_registry;
use shelfkeeper::session::Cookie;
use shelfkeeper::{SearchOptions, Shelf};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    let registry = build_registry(&settings).context("registering providers")?;
    let mut shelf = Shelf::open(settings, registry).context("opening catalog")?;
    if checks_version(&cli.command) {
        if let Some(report) = shelf.upgrade_state(false).await.context("upgrading catalog state")? {
            info!(migrated = report.migrated.len(), removed = report.removed.len(), "catalog state upgraded");
        }
    }

    run(&mut shelf, cli.command).await?;

    if !cli.no_save {
        let written = shelf.save().context("saving catalog")?;
        info!(files = written, "state saved");
    }
    Ok(())
}

/// Every command but `upgrade` first self-migrates a stale catalog.
fn checks_version(command: &Commands) -> bool {
    !matches!(command, Commands::Upgrade { .. })
}

async fn run(shelf: &mut Shelf, command: Commands) -> Result<()> {
    match command {
        Commands::Providers => {
            for (id, caps) in shelf.registry().capabilities() {
                println!("{id}\t{}", caps.media_kind);
            }
        }
        Commands::List { kind } => {
            for (i, s) in shelf.list(kind).iter().enumerate() {
                println!("{i:4}|\t{}\t{} {}\t{}/{}", s.global_id, s.name, s.season_title, s.last_read, s.last_number);
            }
        }
        Commands::ListFromProviders { kind, provider, limit } => {
            for (i, item) in shelf.list_from_providers(kind, provider.as_deref(), limit).await?.iter().enumerate() {
                println!("{i:4}| {}\t{} {}", item.global_id(), item.name, item.season_title);
            }
        }
        Commands::Search { term, kind, provider, exact, limit, add } => {
            let opts = SearchOptions { provider_id: provider, media_kind: kind, exact, limit, ..Default::default() };
            if add {
                match shelf.search_add(&term, &opts).await? {
                    Some(gid) => println!("added {gid}"),
                    None => bail!("no results for {term}"),
                }
            } else {
                for (i, item) in shelf.search(&term, &opts).await?.iter().enumerate() {
                    println!("{i:4}| {}\t{} {}", item.global_id(), item.name, item.season_title);
                }
            }
        }
        Commands::AddUrl { url } => {
            let gid = shelf.add_from_url(&url).await.with_context(|| format!("adding {url}"))?;
            println!("added {gid}");
        }
        Commands::Remove { name } => {
            let item = shelf.remove_item(&name)?;
            println!("removed {}", item.global_id());
        }
        Commands::Update { name, kind, replace, strict } => {
            let report = shelf.update(name.as_deref(), kind, replace, !strict).await?;
            for (gid, new) in &report.updated {
                for sub in new {
                    println!("{gid}\t{}\t{}", sub.number, sub.title);
                }
            }
            for (gid, err) in &report.failed {
                eprintln!("failed to update {gid}: {err}");
            }
        }
        Commands::Migrate { name, exact, same_provider, same_id } => {
            let opts = MigrateOptions { exact, move_to_new_provider: !same_provider, force_same_provider_id: same_id };
            let report = shelf.migrate(name.as_deref(), opts).await?;
            for (from, to) in &report.migrated {
                println!("{from} -> {to}");
            }
            for gid in &report.removed {
                eprintln!("removed {gid}: no replacement found");
            }
        }
        Commands::Upgrade { force } => match shelf.upgrade_state(force).await? {
            Some(report) => println!("re-resolved {} items, removed {}", report.migrated.len(), report.removed.len()),
            None => println!("catalog is up to date"),
        },
        Commands::MarkRead { name, kind, n, abs, force } => {
            let count = shelf.mark_read(name.as_deref(), kind, n, force, abs);
            println!("updated {count} items");
        }
        Commands::Offset { name, offset } => {
            if shelf.set_offset(&name, offset) == 0 {
                bail!("no media named {name}");
            }
        }
        Commands::Unread { name, kind, limit, any } => {
            for (gid, sub) in shelf.unreads(kind, name.as_deref(), limit, any) {
                println!("{gid}\t{}\t{}", sub.number, sub.title);
            }
        }
        Commands::AddCookie { domain, name, value, path } => {
            let mut cookie = Cookie::new(domain, name, value);
            cookie.path = path;
            if !shelf.session_mut().add_cookie(cookie) {
                bail!("cookie was rejected");
            }
        }
    }
    Ok(())
}
