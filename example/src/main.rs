//! A small thermostat-style application built on hubrt.
//!
//! A persistent data item holds the target temperature, a simulated sensor
//! drifts toward it once per second, and an accumulator counts how often
//! the heating was switched. Publish `$SYS/save` to snapshot the state or
//! `$SYS/exit` (or press Ctrl-C) to shut down.

use anyhow::Result;
use hubrt::prelude::*;
use std::path::Path;
use std::time::Duration;

struct ThermostatModule;

impl Module for ThermostatModule {
    fn on_initialize(&mut self, app: &Application) -> Result<()> {
        let target =
            app.add_data_item("data", "thermostat.target", LocalDataItem::<f64>::persistent())?;
        let current =
            app.add_data_item("data", "thermostat.current", LocalDataItem::<f64>::ephemeral())?;
        app.add_data_item("data", "thermostat.display", AliasDataItem::new(&current))?;

        // simulated sensor: drift toward the target, one step per second
        let sensor_target = target.clone();
        let sensor_current = current.clone();
        app.invoke_at_fixed_rate(
            move |_| {
                let goal = sensor_target.value().unwrap_or(21.0);
                let now = sensor_current.value().unwrap_or(15.0);
                let step = (goal - now).clamp(-0.5, 0.5);
                if step.abs() > f64::EPSILON {
                    let _ = sensor_current.request_change(now + step);
                }
            },
            Duration::from_secs(1),
            Duration::from_secs(1),
        );

        app.subscribe("data/#", |message: &Message| {
            tracing::info!("changed: {}", message.topic());
        })?;

        // seed the target on first run, after any saved state was restored
        let seed = target.clone();
        app.invoke_later(
            move |_| {
                if seed.value().is_none() {
                    let _ = seed.request_change(21.5);
                }
            },
            Duration::ZERO,
        );
        Ok(())
    }
}

fn main() -> Result<()> {
    let _log_guard = LoggerConfig::from_env().init()?;

    let config_path = Path::new("app.toml");
    let config = if config_path.exists() {
        AppConfig::load(config_path)?
    } else {
        AppConfig::default()
    };

    let app = Application::with_config(config);
    app.add_data_gateway(DATA_GATEWAY)?;
    app.add_gateway(LOCAL_GATEWAY, EchoGateway::new())?;
    app.set_persistent_storage(JsonFileStorage::new("thermostat-state.json"))?;
    app.add_module(ThermostatModule)?;
    app.add_shutdown_hook(|_| tracing::info!("thermostat shutting down"));

    app.launch()?;
    tracing::info!("thermostat running, press Ctrl-C to exit");
    app.join()?;
    Ok(())
}
