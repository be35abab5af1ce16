use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use sdeploy_deploy::{
    ensure_certificate, BackendProcess, BackendSpec, BuildRunner, ProjectConfig, WatchLoop,
    WatchSet,
};
use sdeploy_server::{
    serve_redirect, DeployServer, ProxyConfig, RedirectConfig, RedirectHandler, ServerConfig,
    TlsConfig,
};
use sdeploy_store::{ReleaseId, ReleaseResolver, ReleaseStore, StoreError};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::cli::*;

pub async fn run_command(cli: Cli, shutdown: CancellationToken) -> anyhow::Result<()> {
    let Cli { command, root, config, format, .. } = cli;
    let project = ProjectConfig::load(&root, config.as_deref()).context("loading configuration")?;
    let algorithm = project.manifest_algorithm()?;
    let store = Arc::new(
        ReleaseStore::open(project.state_root(&root))
            .context("opening release store")?
            .with_algorithm(algorithm)
            .with_history_limit(project.build.history_limit),
    );

    match command {
        Command::Build => cmd_build(&root, project, store).await,
        Command::Rollback(args) => cmd_rollback(&store, args),
        Command::Serve(args) => cmd_serve(&root, project, store, args, false, shutdown).await,
        Command::Full(args) => cmd_serve(&root, project, store, args, true, shutdown).await,
        Command::Releases => cmd_releases(&store, &format),
        Command::Verify(args) => cmd_verify(&store, args, &format),
    }
}

/// Exit status for a failed command: 2 when the store refused the operation
/// in its current state, 1 for anything else.
pub fn exit_status(error: &anyhow::Error) -> u8 {
    let store_error = error.chain().find_map(|cause| cause.downcast_ref::<StoreError>());
    match store_error {
        Some(e) if e.is_precondition() => 2,
        _ => 1,
    }
}

async fn cmd_build(root: &Path, project: ProjectConfig, store: Arc<ReleaseStore>) -> anyhow::Result<()> {
    let algorithm = store.algorithm();
    let runner = BuildRunner::new(root, project, store);
    let id = runner.build_and_release().await?;
    println!(
        "{} Active release: {} ({} manifest)",
        "✓".green().bold(),
        id.to_string().yellow(),
        algorithm
    );
    Ok(())
}

fn cmd_rollback(store: &ReleaseStore, args: RollbackArgs) -> anyhow::Result<()> {
    let id = store.rollback(args.steps)?;
    println!("{} Rolled back {} step(s). Active release: {}", "✓".green().bold(), args.steps, id.to_string().yellow());
    Ok(())
}

fn cmd_releases(store: &ReleaseStore, format: &OutputFormat) -> anyhow::Result<()> {
    let history = store.history()?;
    let active = store.current_pointer()?.map(|p| p.release);
    let stored = store.list_releases()?;

    if let OutputFormat::Json = format {
        let doc = serde_json::json!({ "active": active, "history": history.entries(), "stored": stored });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    if history.is_empty() {
        println!("No deploys recorded.");
        return Ok(());
    }
    for entry in history.entries().iter().rev() {
        let marker = if active.as_ref() == Some(&entry.release) { "*".green().bold() } else { " ".normal() };
        println!(
            "{} {}  {}  {} files",
            marker,
            entry.release.to_string().yellow(),
            entry.created_at_utc.format("%Y-%m-%d %H:%M:%S UTC").to_string().dimmed(),
            entry.files,
        );
    }
    println!("{} release(s) stored on disk.", stored.len());
    Ok(())
}

fn cmd_verify(store: &ReleaseStore, args: VerifyArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let id = match args.release {
        Some(name) => ReleaseId::parse(&name).with_context(|| format!("invalid release id: {name}"))?,
        None => store.active_release()?,
    };
    let report = store.verify_release(&id)?;

    if let OutputFormat::Json = format {
        let doc = serde_json::json!({
            "release": report.release,
            "checked": report.checked,
            "missing": report.diff.missing,
            "extra": report.diff.extra,
            "changed": report.diff.changed,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else if report.is_clean() {
        println!("{} {} intact ({} files)", "✓".green().bold(), id.to_string().yellow(), report.checked);
    } else {
        println!("{} {} failed verification", "✗".red().bold(), id.to_string().yellow());
        for path in &report.diff.missing {
            println!("  {} {}", "missing:".red(), path);
        }
        for path in &report.diff.extra {
            println!("  {} {}", "extra:".red(), path);
        }
        for path in &report.diff.changed {
            println!("  {} {}", "changed:".red(), path);
        }
    }
    report.ensure_clean()?;
    Ok(())
}

async fn cmd_serve(
    root: &Path,
    project: ProjectConfig,
    store: Arc<ReleaseStore>,
    args: ServeArgs,
    build_first: bool,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let cert = project.cert_path(root);
    let key = project.key_path(root);
    ensure_certificate(&cert, &key).await.context("provisioning TLS certificate")?;

    let runner = BuildRunner::new(root, project.clone(), Arc::clone(&store));
    if build_first {
        runner.build_and_release().await?;
    } else if !store.has_active_release() {
        tracing::info!("no active release, building the first one");
        runner.build_and_release().await?;
    }

    let https_port = args.frontend_https_port.unwrap_or(project.serve.https_port);
    let public_host = project.serve.public_host.clone();
    let frontend_origin = format!("https://{public_host}:{https_port}");

    let mut backend = None;
    let api_origin = if args.with_api {
        let spec = BackendSpec {
            command: project.backend.command.clone(),
            working_dir: root.to_path_buf(),
            port: args.api_port.unwrap_or(project.backend.port),
            frontend_origin: frontend_origin.clone(),
            tls: args.api_https.then(|| (cert.clone(), key.clone())),
        };
        let mut process = BackendProcess::spawn(&spec)?;
        tokio::time::sleep(Duration::from_millis(project.backend.startup_delay_ms)).await;
        process.check_running()?;
        let origin = process.origin().to_string();
        tracing::info!(pid = ?process.id(), %origin, "backend running");
        backend = Some(process);
        Some(origin)
    } else {
        args.api_origin.clone().or_else(|| project.proxy.origin.clone())
    };

    let bind_ip: IpAddr = project
        .serve
        .bind_host
        .parse()
        .with_context(|| format!("invalid serve.bind_host: {}", project.serve.bind_host))?;
    let config = ServerConfig {
        https_addr: SocketAddr::new(bind_ip, https_port),
        tls: TlsConfig { cert_path: cert, key_path: key },
        redirect: args.enable_http_redirect.then(|| RedirectConfig {
            bind_addr: SocketAddr::new(
                bind_ip,
                args.frontend_http_port.unwrap_or(project.serve.http_redirect_port),
            ),
            public_host: public_host.clone(),
        }),
        proxy: api_origin.clone().map(|origin| ProxyConfig {
            path_prefix: project.proxy.prefix.clone(),
            origin,
            streaming_suffix: project.proxy.streaming_suffix.clone(),
            timeout_secs: project.proxy.timeout_secs,
            chunk_size: project.proxy.chunk_size,
            max_request_body: project.proxy.max_request_body,
        }),
        shutdown_grace_secs: project.serve.shutdown_grace_secs,
    };

    let resolver: Arc<dyn ReleaseResolver> = store;
    let server = DeployServer::new(config.clone(), resolver, shutdown.clone())?;

    let mut companions = JoinSet::new();
    if let Some(redirect) = &config.redirect {
        let handler = RedirectHandler::new(redirect.public_host.clone(), https_port);
        companions.spawn(serve_redirect(redirect.bind_addr, handler, shutdown.clone()));
        println!("Frontend HTTP redirect: {}", format!("http://{public_host}:{}", redirect.bind_addr.port()).blue());
    }

    let watcher = args.watch.then(|| {
        let interval = args
            .watch_interval
            .map(|secs| Duration::from_secs(secs.max(1)))
            .unwrap_or_else(|| project.watch.interval());
        let set = WatchSet::new(root, project.watch.dirs.clone(), project.watch.files.clone());
        tokio::spawn(WatchLoop::new(set, runner, interval).run(shutdown.clone()))
    });

    println!("{} Frontend HTTPS: {}", "✓".green().bold(), frontend_origin.blue());
    match &api_origin {
        Some(origin) => println!("  API proxy: {} → {}", project.proxy.prefix.bold(), origin.blue()),
        None => println!("  No API origin configured; serving static files only."),
    }
    println!("  Press Ctrl+C to stop.");

    let result = server.serve().await;
    shutdown.cancel();

    while let Some(joined) = companions.join_next().await {
        match joined {
            Ok(Err(e)) => tracing::warn!(error = %e, "redirect listener failed"),
            Err(e) => tracing::warn!(error = %e, "redirect listener task failed"),
            Ok(Ok(())) => {}
        }
    }
    if let Some(handle) = watcher {
        if tokio::time::timeout(Duration::from_secs(2), handle).await.is_err() {
            tracing::warn!("watch loop did not stop in time");
        }
    }
    if let Some(process) = backend {
        process.stop().await;
    }
    result.context("HTTPS server failed")
}
