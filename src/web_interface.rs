use crate::{
    aggregate::{self, DeviceFilter, ReadingFilter, WorkingSet, WINDOW_SIZE},
    dto::{Reading, ReadingRow},
    feed::ReadingFeed,
    template::{DeviceOption, IndexTemplate, ReadingTemplate, StatsTemplate},
    util::{
        self,
        static_file::StaticFile,
        DatabaseError,
    },
};
use askama::Template;
use async_stream::stream;
use axum::{
    extract::{FromRef, Query, State},
    http::{header, Uri},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse,
    },
    routing::get,
    Router,
};
use chrono::{TimeZone, Utc};
use futures::Stream;
use serde::Deserialize;
use sqlx::SqlitePool;
use std::{convert::Infallible, time::Duration};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::{error, info, warn};

#[derive(Clone, FromRef)]
struct AppState {
    pool: SqlitePool,
    feed: ReadingFeed,
}

/// Filter dimensions as they arrive on the query string. Blank strings mean
/// "match all"; a blank minimum power means zero.
#[derive(Clone, Debug, Default, Deserialize)]
struct FilterParams {
    device: Option<String>,
    min_power: Option<String>,
    date: Option<String>,
}

impl FilterParams {
    fn to_filter(&self) -> ReadingFilter {
        ReadingFilter {
            device: DeviceFilter::parse(self.device.as_deref()),
            min_power: self
                .min_power
                .as_deref()
                .map(str::trim)
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(0.0),
            date_prefix: self
                .date
                .as_deref()
                .map(str::trim)
                .filter(|raw| !raw.is_empty())
                .map(str::to_string),
        }
    }
}

async fn fetch_recent(pool: &SqlitePool) -> Result<Vec<ReadingRow>, sqlx::Error> {
    sqlx::query_as::<_, ReadingRow>(
        "SELECT id, device_id, time, current, voltage, power, created_at
         FROM readings
         ORDER BY id DESC
         LIMIT ?",
    )
    .bind(WINDOW_SIZE as i64)
    .fetch_all(pool)
    .await
}

async fn index(
    State(pool): State<SqlitePool>,
    Query(params): Query<FilterParams>,
) -> axum::response::Result<impl IntoResponse> {
    let rows = fetch_recent(&pool).await.map_err(DatabaseError)?;

    let mut window = WorkingSet::new();
    window.load_initial(rows.into_iter().map(Reading::from));

    let selected = params.device.clone().unwrap_or_else(|| "all".to_string());
    let devices = window
        .device_ids()
        .into_iter()
        .map(|id| DeviceOption {
            selected: id == selected,
            id,
        })
        .collect();

    let template = IndexTemplate {
        devices,
        min_power: params.min_power.clone().unwrap_or_default(),
        date: params.date.clone().unwrap_or_default(),
    };

    let body = template.render().map_err(|err| err.to_string())?;
    Ok(Html(body))
}

fn reading_stream(
    state: AppState,
    filter: ReadingFilter,
) -> impl Stream<Item = Result<Event, Infallible>> {
    stream! {
        // Subscribe before the initial fetch so nothing falls in the gap;
        // rows seen by both are deduplicated by id below.
        let mut receiver = state.feed.subscribe();

        match fetch_recent(&state.pool).await {
            Err(err) => {
                error!("Error occurred while fetching readings: {}", err);
            }
            Ok(rows) => {
                let mut last_seen_id = rows.iter().map(|row| row.id).max().unwrap_or(0);

                let mut window = WorkingSet::new();
                window.load_initial(rows.into_iter().map(Reading::from));

                let filtered = filter.apply(&window.normalized());
                for row in &filtered {
                    if let Ok(data) = ReadingTemplate::from(row).render() {
                        yield Ok(Event::default().event("reading").data(data));
                    }
                }
                if let Ok(data) = StatsTemplate::from(&aggregate::summarize(&filtered)).render() {
                    yield Ok(Event::default().event("stats").data(data));
                }

                loop {
                    match receiver.recv().await {
                        Ok(row) => {
                            if row.id <= last_seen_id {
                                continue;
                            }
                            last_seen_id = row.id;

                            let reading = Reading::from(row);
                            window.push(reading.clone());

                            if let Some(normalized) =
                                aggregate::normalize(std::iter::once(&reading)).pop()
                            {
                                if filter.matches(&normalized) {
                                    if let Ok(data) = ReadingTemplate::from(&normalized).render() {
                                        yield Ok(Event::default().event("reading").data(data));
                                    }
                                }
                            }

                            let filtered = filter.apply(&window.normalized());
                            if let Ok(data) =
                                StatsTemplate::from(&aggregate::summarize(&filtered)).render()
                            {
                                yield Ok(Event::default().event("stats").data(data));
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            // Readings beyond the window are discardable by
                            // contract, so skipping to the live edge is fine.
                            warn!("Reading feed lagged, skipped {} rows", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    }
}

async fn sse_handler(
    State(state): State<AppState>,
    Query(params): Query<FilterParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let filter = params.to_filter();

    Sse::new(reading_stream(state, filter)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("alive"),
    )
}

const EMPTY_CHART: &str =
    r#"<svg xmlns="http://www.w3.org/2000/svg" width="480" height="240"></svg>"#;

async fn chart_svg(
    State(pool): State<SqlitePool>,
    Query(params): Query<FilterParams>,
) -> axum::response::Result<impl IntoResponse> {
    let rows = fetch_recent(&pool).await.map_err(DatabaseError)?;

    let mut window = WorkingSet::new();
    window.load_initial(rows.into_iter().map(Reading::from));

    let filtered = params.to_filter().apply(&window.normalized());

    let entries: Vec<_> = filtered
        .iter()
        .filter_map(|row| {
            let instant = Utc.timestamp_millis_opt(row.time_ms).single()?;
            Some((instant, row.reading.power.unwrap_or(0.0)))
        })
        .collect();

    let svg = util::plot::plot_power_svg("Power (W)", entries)
        .unwrap_or_else(|_| EMPTY_CHART.to_string());

    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg))
}

pub async fn start_server(pool: SqlitePool, http_addr: String) -> anyhow::Result<()> {
    info!("Starting web server @ {}", http_addr);

    let feed = ReadingFeed::start(pool.clone());

    let app = Router::new()
        .route("/", get(index))
        .route("/events", get(sse_handler))
        .route("/chart.svg", get(chart_svg))
        .route("/static/*file", get(static_handler))
        .fallback_service(get(not_found))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { pool, feed });

    let listener = TcpListener::bind(&http_addr).await?;
    info!("Listening on {}", &http_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn static_handler(uri: Uri) -> impl IntoResponse {
    let mut path = uri.path().trim_start_matches('/').to_string();

    if path.starts_with("static/") {
        path = path.replace("static/", "");
    }

    StaticFile(path)
}

async fn not_found() -> Html<&'static str> {
    Html("<h1>404</h1><p>Not Found</p>")
}
