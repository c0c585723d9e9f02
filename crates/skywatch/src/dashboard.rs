//! The dashboard loop: poll, log changes, stop on ctrl-c.

use chrono::Utc;
use miette::{IntoDiagnostic, Result};
use skywatch_feed::{DashboardState, Poller, ReadingStore, TrendEngine};
use skywatch_session::Route;
use tracing::{info, warn};

use crate::App;

pub(crate) async fn run(app: &App) -> Result<()> {
    let resolver = app.resolver();
    let sources: Vec<String> = resolver.source_names().into_iter().map(String::from).collect();
    let trend = TrendEngine::new(ReadingStore::new(app.tiers.durable.clone()));
    let poller = Poller::builder(resolver, trend)
        .feed_config(&app.feed)
        .build()
        .into_diagnostic()?;

    let mut states = poller.subscribe();
    let mut routes = app.routes.subscribe();

    info!(
        ?sources,
        latitude = app.feed.location.latitude,
        longitude = app.feed.location.longitude,
        "starting dashboard"
    );
    poller.start();

    let mut previous = DashboardState::default();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                report(&previous, &state);
                previous = state;
            }
            changed = routes.changed() => {
                if changed.is_err() {
                    break;
                }
                let route = *routes.borrow_and_update();
                if route == Route::Login {
                    warn!("session expired, continuing with public data; run `skywatch login` to restore it");
                }
            }
        }
    }

    poller.stop();
    Ok(())
}

/// Log what changed between two snapshots.
fn report(previous: &DashboardState, state: &DashboardState) {
    if state.is_initial_load() && !previous.is_initial_load() {
        info!("loading");
    }

    if state.latest != previous.latest {
        if let Some(latest) = &state.latest {
            info!(
                value = latest.reading.value,
                trend = ?latest.trend,
                at = %latest.reading.timestamp,
                "latest reading"
            );
        }
    }

    if state.history != previous.history {
        if let Some(history) = &state.history {
            let last = history.last().map(|r| r.value);
            info!(points = history.len(), ?last, "history window");
        }
    }

    if state.latest_error != previous.latest_error {
        if let Some(error) = &state.latest_error {
            warn!(%error, "latest reading unavailable, showing last known value");
        }
    }

    if state.history_error != previous.history_error {
        if let Some(error) = &state.history_error {
            warn!(%error, "history unavailable, showing last known window");
        }
    }
}

/// One-shot weekly statistics, printed as JSON.
pub(crate) async fn weekly(app: &App) -> Result<()> {
    let resolved = app
        .resolver()
        .weekly_stats(app.feed.location, app.feed.metric)
        .await
        .into_diagnostic()?;

    info!(source = %resolved.source, days = resolved.value.days.len(), "weekly statistics");
    let json = serde_json::to_string_pretty(&resolved.value).into_diagnostic()?;
    println!("{}", json);
    Ok(())
}

/// One-shot forecast for `day` days ahead, printed as JSON.
pub(crate) async fn predict(app: &App, day: u8) -> Result<()> {
    let resolved = app
        .resolver()
        .prediction(
            app.feed.location,
            app.feed.metric,
            Utc::now().date_naive(),
            day,
        )
        .await
        .into_diagnostic()?;

    let prediction = resolved.value;
    info!(source = %resolved.source, day, date = %prediction.date, points = prediction.hourly.len(), "prediction");
    let json = serde_json::to_string_pretty(&serde_json::json!({
        "day": prediction.day,
        "date": prediction.date,
        "hourly": prediction.hourly,
        "min": prediction.min(),
        "max": prediction.max(),
        "avg": prediction.avg(),
    }))
    .into_diagnostic()?;
    println!("{}", json);
    Ok(())
}
