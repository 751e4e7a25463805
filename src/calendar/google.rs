//! Google Calendar v3 REST provider.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{CalendarError, CalendarEvent, CalendarProvider, NewEvent};
use crate::model::{Ms, Span};

pub const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

const PAGE_SIZE: &str = "250";

pub struct GoogleCalendar {
    client: Client,
    base_url: String,
    access_token: String,
    /// Zone for all-day dates and for created events.
    time_zone: Tz,
}

impl GoogleCalendar {
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
        time_zone: Tz,
        timeout: Duration,
    ) -> Result<Self, CalendarError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CalendarError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            time_zone,
        })
    }

    fn events_url(&self, calendar_ref: &str) -> String {
        format!(
            "{}/calendars/{}/events",
            self.base_url,
            urlencoding::encode(calendar_ref)
        )
    }

    fn event_time(&self, ms: Ms) -> Result<EventTime, CalendarError> {
        let instant = DateTime::<Utc>::from_timestamp_millis(ms)
            .ok_or_else(|| CalendarError::Decode(format!("timestamp out of range: {ms}")))?;
        Ok(EventTime {
            date_time: Some(
                instant
                    .with_timezone(&self.time_zone)
                    .to_rfc3339_opts(SecondsFormat::Secs, false),
            ),
            date: None,
            time_zone: Some(self.time_zone.name().to_string()),
        })
    }

    fn parse_event_time(&self, t: &EventTime) -> Result<Ms, CalendarError> {
        if let Some(ref dt) = t.date_time {
            return DateTime::parse_from_rfc3339(dt)
                .map(|d| d.timestamp_millis())
                .map_err(|e| CalendarError::Decode(format!("bad dateTime {dt:?}: {e}")));
        }
        if let Some(ref d) = t.date {
            // All-day events start at local midnight.
            let date = NaiveDate::parse_from_str(d, "%Y-%m-%d")
                .map_err(|e| CalendarError::Decode(format!("bad date {d:?}: {e}")))?;
            let midnight = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| CalendarError::Decode(format!("bad date {d:?}")))?;
            return self
                .time_zone
                .from_local_datetime(&midnight)
                .earliest()
                .map(|d| d.timestamp_millis())
                .ok_or_else(|| CalendarError::Decode(format!("no local midnight for {d:?}")));
        }
        Err(CalendarError::Decode("event time has neither dateTime nor date".into()))
    }
}

fn rfc3339(ms: Ms) -> Result<String, CalendarError> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|d| d.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| CalendarError::Decode(format!("timestamp out of range: {ms}")))
}

async fn ensure_success(response: Response) -> Result<Response, CalendarError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(CalendarError::Status {
        status: status.as_u16(),
        body,
    })
}

fn transport(e: reqwest::Error) -> CalendarError {
    CalendarError::Transport(e.to_string())
}

#[async_trait]
impl CalendarProvider for GoogleCalendar {
    async fn list_events(&self, calendar_ref: &str, window: Span) -> Result<Vec<CalendarEvent>, CalendarError> {
        let url = self.events_url(calendar_ref);
        let time_min = rfc3339(window.start)?;
        let time_max = rfc3339(window.end)?;
        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("timeMin", time_min.clone()),
                ("timeMax", time_max.clone()),
                ("singleEvents", "true".to_string()),
                ("orderBy", "startTime".to_string()),
                ("maxResults", PAGE_SIZE.to_string()),
            ];
            if let Some(token) = page_token.take() {
                query.push(("pageToken", token));
            }

            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.access_token)
                .query(&query)
                .send()
                .await
                .map_err(transport)?;
            let page: EventsPage = ensure_success(response)
                .await?
                .json()
                .await
                .map_err(|e| CalendarError::Decode(e.to_string()))?;

            for item in page.items {
                if item.status.as_deref() == Some("cancelled") {
                    continue;
                }
                // An event whose times cannot be read still occupies something;
                // claim the whole query window rather than drop it.
                let span = match (self.parse_event_time(&item.start), self.parse_event_time(&item.end)) {
                    (Ok(start), Ok(end)) => match Span::checked(start, end) {
                        Some(span) => span,
                        None => {
                            tracing::debug!(event_id = %item.id, "skipping zero-length calendar event");
                            continue;
                        }
                    },
                    (Err(e), _) | (_, Err(e)) => {
                        tracing::warn!(
                            event_id = %item.id,
                            calendar_ref,
                            "undecodable event time, blocking the whole window: {e}"
                        );
                        window
                    }
                };
                events.push(CalendarEvent {
                    id: item.id,
                    summary: item.summary,
                    span,
                    description: item.description,
                });
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        tracing::debug!(calendar_ref, count = events.len(), "listed calendar events");
        Ok(events)
    }

    async fn create_event(&self, calendar_ref: &str, event: NewEvent) -> Result<String, CalendarError> {
        let body = EventBody {
            summary: event.summary,
            description: event.description,
            start: self.event_time(event.span.start)?,
            end: self.event_time(event.span.end)?,
        };
        let response = self
            .client
            .post(self.events_url(calendar_ref))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let created: CreatedEvent = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| CalendarError::Decode(e.to_string()))?;
        Ok(created.id)
    }

    async fn delete_event(&self, calendar_ref: &str, event_id: &str) -> Result<(), CalendarError> {
        let url = format!(
            "{}/{}",
            self.events_url(calendar_ref),
            urlencoding::encode(event_id)
        );
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(transport)?;
        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                tracing::debug!(calendar_ref, event_id, "calendar event already gone");
                Ok(())
            }
            _ => ensure_success(response).await.map(|_| ()),
        }
    }
}

// ── Wire types ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsPage {
    #[serde(default)]
    items: Vec<GoogleEvent>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleEvent {
    id: String,
    summary: Option<String>,
    description: Option<String>,
    status: Option<String>,
    #[serde(default)]
    start: EventTime,
    #[serde(default)]
    end: EventTime,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    #[serde(skip_serializing_if = "Option::is_none")]
    date_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

#[derive(Debug, Serialize)]
struct EventBody {
    summary: String,
    description: String,
    start: EventTime,
    end: EventTime,
}

#[derive(Debug, Deserialize)]
struct CreatedEvent {
    id: String,
}
