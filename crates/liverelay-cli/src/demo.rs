//! Demo `ticker` producer: an initial series, then one new point per interval.

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use liverelay_core::{EventSender, Params, Producer};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Point {
    pub index: u32,
    pub value: f64,
}

#[derive(Debug, Serialize)]
pub struct Series {
    pub points: Vec<Point>,
    pub interval_ms: u64,
}

/// Linear series `start + step * index`.
///
/// Params: `start` (0), `step` (1), `initial` points rendered up front (5),
/// `count` points pushed afterwards (10), `interval_ms` between pushes (1000).
#[derive(Debug, Default)]
pub struct Ticker;

impl Producer for Ticker {
    type Output = Series;
    type Event = Point;

    fn produce(&self, params: &Params, events: EventSender<Point>) -> anyhow::Result<Series> {
        let start: f64 = params.get_parsed("start", 0.0)?;
        let step: f64 = params.get_parsed("step", 1.0)?;
        let initial: u32 = params.get_parsed("initial", 5)?;
        let count: u32 = params.get_parsed("count", 10)?;
        let interval_ms: u64 = params.get_parsed("interval_ms", 1000)?;
        anyhow::ensure!(interval_ms > 0, "interval_ms must be positive");

        let point = move |index: u32| Point {
            index,
            value: start + step * f64::from(index),
        };

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.tick().await;
            for index in initial..initial.saturating_add(count) {
                tokio::select! {
                    () = events.closed() => {
                        debug!(session_id = %events.id(), "Client gone, ticker stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        if events.send(point(index)).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        Ok(Series {
            points: (0..initial).map(point).collect(),
            interval_ms,
        })
    }
}
