/*
 *  main.rs
 *
 *  PlugHeap - same heap, same hands
 *  (c) 2020-26 Stuart Hunter
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::sync::Arc;

use anyhow::{Context, Result};
use env_logger::Env;
use log::{info, warn};

use plugheap::config::{self, SessionConfig};
use plugheap::{LoaderError, Module, ModuleInfo, ModuleLoader, ModuleState};

include!(concat!(env!("OUT_DIR"), "/build_info.rs"));

/// Open one module and run its requests through a single object. The
/// module stays open for the caller to list and close.
fn run_session(loader: &ModuleLoader, session: &SessionConfig) -> Result<Arc<Module>> {
    let module = loader
        .open_spec(&session.module)
        .with_context(|| format!("opening module '{}'", session.module))?;

    match module.query_version() {
        Ok(version) => info!("{} reports version {}", module.path().display(), version),
        Err(LoaderError::Unsupported(_)) => info!("{} reports no version", module.path().display()),
        Err(e) => warn!("{}: {}", module.path().display(), e),
    }

    let mut object = module
        .create(session.args())
        .with_context(|| format!("creating object in '{}'", session.module))?;

    let name = object.name()?;
    info!("Created object '{}'", name);

    let label = name.clone();
    object.set_listener(move |event| {
        println!("[{}] event: {}", label, String::from_utf8_lossy(event));
    })?;

    for request in session.requests() {
        match object.invoke(request.as_bytes()) {
            Ok(response) => println!("[{}] {} -> {}", name, request, String::from_utf8_lossy(&response)),
            Err(e) => warn!("[{}] {} failed: {}", name, request, e),
        }
    }

    object.destroy();
    Ok(module)
}

fn print_modules(modules: &[ModuleInfo]) {
    if modules.is_empty() {
        println!("no modules open");
        return;
    }

    for m in modules {
        let state = match m.state {
            ModuleState::Opened => "opened",
            ModuleState::Closed => "closed",
        };
        let version = m.version.map_or_else(|| "-".to_string(), |v| v.to_string());
        println!(
            "{:>3}  {:<7} v{:<3} objects={:<3} {}  {}",
            m.id,
            state,
            version,
            m.live_objects,
            m.opened_at.format("%Y-%m-%d %H:%M:%S"),
            m.path.display()
        );
    }
}

fn main() -> Result<()> {
    let (cfg, cli) = config::load().context("loading configuration")?;

    env_logger::Builder::from_env(Env::default().default_filter_or(cfg.log_level()))
        .format_timestamp_secs()
        .init();

    info!("{} - same heap, same hands", env!("CARGO_PKG_NAME"));
    info!("v.{} built {}", env!("CARGO_PKG_VERSION"), BUILD_DATE);

    let loader = ModuleLoader::new(cfg.loader_options());

    if cfg.sessions().is_empty() {
        warn!("No sessions configured; use --module or a config file");
    }

    // One failing module does not stop the rest
    let mut opened = Vec::new();
    let mut failures = 0usize;
    for session in cfg.sessions() {
        match run_session(&loader, session) {
            Ok(module) => opened.push(module),
            Err(e) => {
                warn!("{:#}", e);
                failures += 1;
            }
        }
    }

    if cli.list {
        print_modules(&loader.modules());
    }

    for module in &opened {
        loader.close(module);
    }

    if failures > 0 {
        anyhow::bail!("{} of {} sessions failed", failures, cfg.sessions().len());
    }
    Ok(())
}
