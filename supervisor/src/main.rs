// Prevents additional console window on Windows in release, DO NOT REMOVE!!
#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

use clap::Parser;
use supervisor_lib::actors::{PlannedModel, SwapSupervisorActor, WatchdogActor};
use supervisor_lib::app_state::{ActorHandles, SettingsState};
use supervisor_lib::cli::{apply_cli_overrides, CliArgs, Command};
use supervisor_lib::error::{ErrorKind, OperationOutcome, SupervisorError};
use supervisor_lib::protocol::{SupervisorEvent, SupervisorMsg, WatchdogMsg};
use supervisor_lib::settings::SettingsBundle;
use supervisor_lib::{metadata, paths, platform, projection, provisioner, scanner};
use tokio::sync::{broadcast, mpsc, oneshot};

#[tokio::main]
async fn main() {
    supervisor_lib::crash_handler::install_crash_handler();

    let cli_args = CliArgs::parse();
    let overrides = apply_cli_overrides(&cli_args);

    let settings_bundle = SettingsBundle::load().await;
    let settings_state = SettingsState::new(settings_bundle);

    let platform_info = platform::detect(overrides.backend_override.as_deref()).await;
    println!(
        "[Launch] Platform: {:?} {} accelerator={} gpu_class={:?} estimated_gpu_mb={}",
        platform_info.os, platform_info.arch, platform_info.accelerator, platform_info.gpu_class, platform_info.estimated_gpu_mb
    );

    let http_client = reqwest::Client::new();
    let binaries = match provisioner::ensure_binaries(&http_client, &platform_info).await {
        Ok(set) => set,
        Err(e) => {
            let err = SupervisorError::new(ErrorKind::CriticalStartPath, e)
                .with_remediation("check network access and ~/.clara/bin permissions, then retry");
            let outcome: OperationOutcome<()> = OperationOutcome::failure(err.to_string());
            eprintln!("{}", serde_json::to_string_pretty(&outcome).unwrap());
            std::process::exit(1);
        }
    };
    if let Err(e) = provisioner::repair_names(&binaries, &platform_info) {
        println!("[Launch] Warning: failed to normalize binary names: {}", e);
    }

    let planned_models = plan_models(&settings_state, &overrides.extra_model_dirs).await;
    println!("[Launch] Planned {} model(s) for config generation", planned_models.len());

    let port = overrides.port_override.unwrap_or(8091);
    let cpu_cores = std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(4);

    let (supervisor_tx, supervisor_rx) = mpsc::channel::<SupervisorMsg>(32);
    let (watchdog_tx, watchdog_rx) = mpsc::channel::<WatchdogMsg>(8);
    let (events_tx, _events_rx) = broadcast::channel::<SupervisorEvent>(64);

    let mut supervisor = SwapSupervisorActor::new(
        events_tx.clone(),
        http_client.clone(),
        settings_state.clone(),
        platform_info.clone(),
        binaries.clone(),
        port,
        cpu_cores,
    );
    supervisor.set_models(planned_models);
    let supervisor_join = tokio::spawn(supervisor.run(supervisor_rx));

    let watchdog = WatchdogActor::new(
        settings_state.clone(),
        events_tx.subscribe(),
        supervisor_tx.clone(),
        overrides.verbose,
    );
    let watchdog_join = tokio::spawn(watchdog.run(watchdog_rx));

    let handles = ActorHandles { supervisor_tx, watchdog_tx, events_tx };

    if !overrides.no_autostart {
        let (reply_tx, reply_rx) = oneshot::channel();
        if handles
            .supervisor_tx
            .send(SupervisorMsg::Start { skip_config_generation: false, reply: reply_tx })
            .await
            .is_ok()
        {
            match reply_rx.await {
                Ok(Ok(status)) => println!("[Launch] Swap proxy autostarted: {:?}", status),
                Ok(Err(e)) => println!("[Launch] Swap proxy autostart failed: {}", e),
                Err(_) => println!("[Launch] Swap proxy actor dropped the autostart reply"),
            }
        }
        let _ = handles.watchdog_tx.send(WatchdogMsg::SignalSetupComplete).await;
    }

    match dispatch(&cli_args, &handles).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("[Launch] Command failed: {}", e);
            std::process::exit(1);
        }
    }

    // A subcommand invocation (Start/Stop/.../Diagnostics) runs to completion
    // and exits; with none given, this is a long-lived supervisor process and
    // we block on the two actor tasks for the life of the program.
    if cli_args.command.is_none() {
        let _ = tokio::join!(supervisor_join, watchdog_join);
    }
}

/// Scan configured model roots, extract GGUF metadata, and resolve vision
/// projection paths, producing the `PlannedModel` set the Swap Proxy
/// Supervisor renders into its config (§4.C/D/E pipeline run once at launch
/// and again whenever `scan`/`forceReconfigure` is invoked).
async fn plan_models(settings_state: &SettingsState, extra_model_dirs: &[std::path::PathBuf]) -> Vec<PlannedModel> {
    let metadata_cache = metadata::MetadataCache::new(256);
    let user_root = paths::models_dir();
    let bundled_root = paths::models_dir().join("bundled");

    let files = scanner::scan(&user_root, &bundled_root, extra_model_dirs, &metadata_cache).await;

    let bundled_generic = paths::models_dir().join("mmproj-generic.gguf");
    let bundled_generic = if bundled_generic.is_file() { Some(bundled_generic) } else { None };

    let mappings = settings_state.bundle.read().await.mmproj_mappings.clone();

    let mut planned = Vec::with_capacity(files.len());
    for file in &files {
        let metadata = metadata_cache.get_or_extract(&file.absolute_path, file.classification.is_embedding()).await;
        let mmproj_path = projection::resolve(file, &files, &mappings, bundled_generic.as_deref());
        planned.push(PlannedModel { file: file.clone(), metadata, mmproj_path });
    }
    planned
}

/// Dispatch the CLI subcommand (if any) against the running actors. With no
/// subcommand given, the process just stays up as the long-lived supervisor
/// (the autostart above already kicked off the swap proxy and watchdog).
async fn dispatch(args: &CliArgs, handles: &ActorHandles) -> Result<(), String> {
    let Some(command) = &args.command else { return Ok(()) };

    match command {
        Command::Start => {
            let (reply, rx) = oneshot::channel();
            handles
                .supervisor_tx
                .send(SupervisorMsg::Start { skip_config_generation: false, reply })
                .await
                .map_err(|e| e.to_string())?;
            let status = rx.await.map_err(|_| "supervisor actor died".to_string())??;
            println!("{}", serde_json::to_string_pretty(&status).unwrap());
        }
        Command::Stop => {
            let (reply, rx) = oneshot::channel();
            handles.supervisor_tx.send(SupervisorMsg::Stop { reply }).await.map_err(|e| e.to_string())?;
            rx.await.map_err(|_| "supervisor actor died".to_string())??;
            println!("Stopped.");
        }
        Command::Restart => {
            let (reply, rx) = oneshot::channel();
            handles
                .supervisor_tx
                .send(SupervisorMsg::Restart { skip_config_regeneration: false, reply })
                .await
                .map_err(|e| e.to_string())?;
            let status = rx.await.map_err(|_| "supervisor actor died".to_string())??;
            println!("{}", serde_json::to_string_pretty(&status).unwrap());
        }
        Command::Status => {
            let (reply, rx) = oneshot::channel();
            handles
                .supervisor_tx
                .send(SupervisorMsg::GetStatus { with_health_check: true, reply })
                .await
                .map_err(|e| e.to_string())?;
            let status = rx.await.map_err(|_| "supervisor actor died".to_string())?;

            let (wd_reply, wd_rx) = oneshot::channel();
            handles.watchdog_tx.send(WatchdogMsg::GetSnapshot { reply: wd_reply }).await.map_err(|e| e.to_string())?;
            let services = wd_rx.await.map_err(|_| "watchdog actor died".to_string())?;

            println!(
                "{}",
                serde_json::json!({ "supervisor": status, "services": services }).to_string()
            );
        }
        Command::Scan => {
            let settings_state = SettingsState::new(SettingsBundle::load().await);
            let planned = plan_models(&settings_state, &[]).await;
            let files: Vec<_> = planned.iter().map(|p| &p.file).collect();
            println!("{}", serde_json::to_string_pretty(&files).unwrap());
        }
        Command::Diagnostics => {
            let platform_info = platform::detect(None).await;

            let settings_state = SettingsState::new(SettingsBundle::load().await);
            let planned = plan_models(&settings_state, &[]).await;
            let binary_outcome = match provisioner::ensure_binaries(&reqwest::Client::new(), &platform_info).await {
                Ok(set) => match provisioner::validate(&set, &platform_info) {
                    Ok(()) => OperationOutcome::ok(set),
                    Err(diagnostics) => {
                        let err = SupervisorError::new(ErrorKind::BinaryProvisioning, "binary validation failed")
                            .with_remediation("re-run with --backend to force a different accelerator");
                        OperationOutcome::failure(err.to_string())
                            .with_diagnostics(serde_json::json!({
                                "base_dir": diagnostics.base_dir,
                                "platform_dir": diagnostics.platform_dir,
                                "platform_dir_listing": diagnostics.platform_dir_listing,
                                "base_dir_listing": diagnostics.base_dir_listing,
                                "attempted_paths": diagnostics.attempted_paths,
                            }))
                    }
                },
                Err(e) => OperationOutcome::failure(e),
            };

            let (reply, rx) = oneshot::channel();
            handles
                .watchdog_tx
                .send(WatchdogMsg::GetMetrics { reply })
                .await
                .map_err(|e| e.to_string())?;
            let metrics = rx.await.map_err(|_| "watchdog actor died".to_string())?;

            println!(
                "{}",
                serde_json::json!({
                    "platform": platform_info,
                    "binaries": binary_outcome,
                    "model_count": planned.len(),
                    "watchdog_metrics": metrics,
                })
            );
        }
    }

    Ok(())
}
