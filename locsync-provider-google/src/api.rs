//! [`CalendarSource`] backed by the Google Calendar v3 REST API.

use async_trait::async_trait;
use chrono::DateTime;
use locsync_core::event::{NewEvent, SourceEvent};
use locsync_core::patch::EventPatch;
use locsync_core::source::{
    CalendarSource, EventPage, ListQuery, Removal, SourceError, SourceResult, WatchRequest,
    WebhookChannel,
};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

use crate::config::GoogleSettings;
use crate::convert::{FromGoogle, ToGoogle, patch_body};
use crate::session::Session;
use crate::types::{Channel, ErrorEnvelope, EVENT_FIELDS, EventsPage, GoogleEvent, StopBody, WatchBody};

const PAGE_SIZE: &str = "250";

pub struct GoogleCalendar {
    http: reqwest::Client,
    base_url: Url,
    calendar_id: String,
    session: Session,
}

impl GoogleCalendar {
    pub fn new(settings: &GoogleSettings) -> SourceResult<Self> {
        let base_url = Url::parse(&settings.api_base_url).map_err(|e| {
            SourceError::Invalid(format!("api_base_url {}: {e}", settings.api_base_url))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(SourceError::Invalid(format!(
                "api_base_url {} cannot hold a path",
                settings.api_base_url
            )));
        }

        let http = reqwest::Client::new();
        Ok(GoogleCalendar {
            session: Session::new(http.clone(), settings),
            http,
            base_url,
            calendar_id: settings.calendar_id.clone(),
        })
    }

    /// `{base}/calendars/{calendar_id}/events/{rest..}` with every segment escaped.
    fn events_url(&self, rest: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // cannot_be_a_base was ruled out in new()
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["calendars", self.calendar_id.as_str(), "events"])
                .extend(rest);
        }
        url
    }

    fn channels_stop_url(&self) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(["channels", "stop"]);
        }
        url
    }

    /// Send with a bearer token, retrying once with a fresh token on 401.
    async fn send<F>(&self, build: F) -> SourceResult<Response>
    where
        F: Fn(&reqwest::Client, &str) -> RequestBuilder,
    {
        let token = self.session.access_token().await?;
        let response = build(&self.http, &token).send().await.map_err(transport)?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!("Access token rejected, refreshing");
        self.session.invalidate().await;
        let token = self.session.access_token().await?;
        build(&self.http, &token).send().await.map_err(transport)
    }
}

#[async_trait]
impl CalendarSource for GoogleCalendar {
    async fn list_events(&self, query: &ListQuery) -> SourceResult<EventPage> {
        let url = self.events_url(&[]);
        let mut params = vec![
            ("singleEvents", "true"),
            ("maxResults", PAGE_SIZE),
            ("fields", EVENT_FIELDS),
        ];
        if let Some(page_token) = query.page_token.as_deref() {
            params.push(("pageToken", page_token));
        }
        if let Some(sync_token) = query.sync_token.as_deref() {
            params.push(("syncToken", sync_token));
        }

        let response = self
            .send(|http, token| http.get(url.clone()).bearer_auth(token).query(&params))
            .await?;

        if query.sync_token.is_some() && response.status() == StatusCode::GONE {
            warn!("Google rejected the sync token");
            return Err(SourceError::InvalidCursor);
        }

        let page: EventsPage = read_json(response).await?;
        Ok(EventPage {
            items: page.items.into_iter().map(SourceEvent::from_google).collect(),
            next_page_token: page.next_page_token.filter(|t| !t.is_empty()),
            next_sync_token: page.next_sync_token.filter(|t| !t.is_empty()),
        })
    }

    async fn patch_event(&self, event_id: &str, patch: &EventPatch) -> SourceResult<SourceEvent> {
        let url = self.events_url(&[event_id]);
        let body = patch_body(patch);

        let response = self
            .send(|http, token| http.patch(url.clone()).bearer_auth(token).json(&body))
            .await?;

        let event: GoogleEvent = read_json(response).await?;
        Ok(SourceEvent::from_google(event))
    }

    async fn insert_event(&self, event: &NewEvent) -> SourceResult<SourceEvent> {
        let url = self.events_url(&[]);
        let body = event.to_google()?;

        let response = self
            .send(|http, token| http.post(url.clone()).bearer_auth(token).json(&body))
            .await?;

        let created: GoogleEvent = read_json(response).await?;
        Ok(SourceEvent::from_google(created))
    }

    async fn delete_event(&self, event_id: &str) -> SourceResult<Removal> {
        let url = self.events_url(&[event_id]);

        let response = self
            .send(|http, token| http.delete(url.clone()).bearer_auth(token))
            .await?;

        removal(response).await
    }

    async fn watch(&self, request: &WatchRequest) -> SourceResult<WebhookChannel> {
        let url = self.events_url(&["watch"]);
        let body = WatchBody {
            id: &request.id,
            kind: "web_hook",
            address: &request.address,
            token: &request.token,
        };

        let response = self
            .send(|http, token| http.post(url.clone()).bearer_auth(token).json(&body))
            .await?;

        let channel: Channel = read_json(response).await?;
        let expires_at = channel
            .expiration
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| {
                SourceError::Decode(format!(
                    "channel {} has no valid expiration: {:?}",
                    channel.id, channel.expiration
                ))
            })?;

        Ok(WebhookChannel {
            id: channel.id,
            resource_id: channel.resource_id,
            expires_at,
        })
    }

    async fn stop_channel(&self, channel_id: &str, resource_id: &str) -> SourceResult<Removal> {
        let url = self.channels_stop_url();
        let body = StopBody {
            id: channel_id,
            resource_id,
        };

        let response = self
            .send(|http, token| http.post(url.clone()).bearer_auth(token).json(&body))
            .await?;

        removal(response).await
    }
}

fn transport(e: reqwest::Error) -> SourceError {
    SourceError::Transport(e.to_string())
}

async fn read_json<T: DeserializeOwned>(response: Response) -> SourceResult<T> {
    if !response.status().is_success() {
        return Err(api_error(response).await);
    }
    response
        .json()
        .await
        .map_err(|e| SourceError::Decode(e.to_string()))
}

/// 404 and 410 both mean the target no longer exists.
async fn removal(response: Response) -> SourceResult<Removal> {
    match response.status() {
        s if s.is_success() => Ok(Removal::Removed),
        StatusCode::NOT_FOUND | StatusCode::GONE => Ok(Removal::AlreadyGone),
        _ => Err(api_error(response).await),
    }
}

async fn api_error(response: Response) -> SourceError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorEnvelope>(&body)
        .map(|envelope| envelope.error.message)
        .unwrap_or(body);

    match status {
        StatusCode::UNAUTHORIZED => SourceError::Auth(message),
        StatusCode::NOT_FOUND => SourceError::NotFound(message),
        _ => SourceError::Api {
            status: status.as_u16(),
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use locsync_core::event::EventStatus;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    async fn mock_token(server: &MockServer, access_token: &str) {
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": access_token, "expires_in": 3600 })),
            )
            .mount(server)
            .await;
    }

    fn calendar(server: &MockServer) -> GoogleCalendar {
        GoogleCalendar::new(&GoogleSettings {
            client_id: "client".into(),
            client_secret: "secret".into(),
            refresh_token: "refresh".into(),
            api_base_url: format!("{}/calendar/v3", server.uri()),
            token_url: format!("{}/token", server.uri()),
            ..GoogleSettings::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_full_listing_converts_items() {
        let server = MockServer::start().await;
        mock_token(&server, "at-1").await;
        Mock::given(method("GET"))
            .and(path("/calendar/v3/calendars/primary/events"))
            .and(header("authorization", "Bearer at-1"))
            .and(query_param("singleEvents", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {
                        "id": "evt-1",
                        "status": "confirmed",
                        "summary": "HOM",
                        "start": { "date": "2024-06-10" },
                        "end": { "date": "2024-06-11" },
                        "updated": "2024-06-01T08:00:00Z"
                    },
                    { "id": "evt-2", "status": "cancelled" }
                ],
                "nextSyncToken": "cursor-1"
            })))
            .mount(&server)
            .await;

        let page = calendar(&server)
            .list_events(&ListQuery::default())
            .await
            .unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(
            page.items[0].single_day(),
            Ok(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap())
        );
        assert_eq!(page.items[1].status, EventStatus::Cancelled);
        assert_eq!(page.next_page_token, None);
        assert_eq!(page.next_sync_token.as_deref(), Some("cursor-1"));
    }

    #[tokio::test]
    async fn test_expired_sync_token_is_invalid_cursor() {
        let server = MockServer::start().await;
        mock_token(&server, "at-1").await;
        Mock::given(method("GET"))
            .and(path("/calendar/v3/calendars/primary/events"))
            .and(query_param("syncToken", "stale"))
            .respond_with(ResponseTemplate::new(410).set_body_json(json!({
                "error": { "code": 410, "message": "Sync token is no longer valid" }
            })))
            .mount(&server)
            .await;

        let result = calendar(&server)
            .list_events(&ListQuery {
                page_token: None,
                sync_token: Some("stale".into()),
            })
            .await;

        assert_eq!(result.unwrap_err(), SourceError::InvalidCursor);
    }

    #[tokio::test]
    async fn test_server_error_keeps_status_and_message() {
        let server = MockServer::start().await;
        mock_token(&server, "at-1").await;
        Mock::given(method("GET"))
            .and(path("/calendar/v3/calendars/primary/events"))
            .respond_with(ResponseTemplate::new(503).set_body_json(json!({
                "error": { "code": 503, "message": "Backend Error" }
            })))
            .mount(&server)
            .await;

        let result = calendar(&server).list_events(&ListQuery::default()).await;

        assert_eq!(
            result.unwrap_err(),
            SourceError::Api {
                status: 503,
                message: "Backend Error".into()
            }
        );
    }

    #[tokio::test]
    async fn test_rejected_token_is_refreshed_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "access_token": "stale", "expires_in": 3600 })),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mock_token(&server, "fresh").await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer stale"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
            .expect(1)
            .mount(&server)
            .await;

        let page = calendar(&server)
            .list_events(&ListQuery::default())
            .await
            .unwrap();

        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn test_patch_sends_only_set_fields() {
        let server = MockServer::start().await;
        mock_token(&server, "at-1").await;
        Mock::given(method("PATCH"))
            .and(path("/calendar/v3/calendars/primary/events/evt-1"))
            .and(body_json(json!({
                "description": "",
                "extendedProperties": { "private": { "locsync_managed": "true" } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "evt-1",
                "summary": "HOM",
                "start": { "date": "2024-06-10" },
                "end": { "date": "2024-06-11" },
                "updated": "2024-06-02T08:00:00Z",
                "extendedProperties": { "private": { "locsync_managed": "true" } }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let patch = EventPatch::new()
            .private_property("locsync_managed", "true")
            .description("");
        let updated = calendar(&server).patch_event("evt-1", &patch).await.unwrap();

        assert_eq!(updated.description, None);
        assert!(updated.private_properties.contains_key("locsync_managed"));
    }

    #[tokio::test]
    async fn test_delete_of_missing_event_is_already_gone() {
        let server = MockServer::start().await;
        mock_token(&server, "at-1").await;
        Mock::given(method("DELETE"))
            .and(path("/calendar/v3/calendars/primary/events/evt-1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/calendar/v3/calendars/primary/events/evt-2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/calendar/v3/calendars/primary/events/evt-3"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let calendar = calendar(&server);

        assert_eq!(calendar.delete_event("evt-1").await, Ok(Removal::Removed));
        assert_eq!(calendar.delete_event("evt-2").await, Ok(Removal::AlreadyGone));
        assert_eq!(calendar.delete_event("evt-3").await, Ok(Removal::AlreadyGone));
    }

    #[tokio::test]
    async fn test_watch_parses_millisecond_expiration() {
        let server = MockServer::start().await;
        mock_token(&server, "at-1").await;
        Mock::given(method("POST"))
            .and(path("/calendar/v3/calendars/primary/events/watch"))
            .and(body_json(json!({
                "id": "ch-1",
                "type": "web_hook",
                "address": "https://locsync.test/webhook/calendar",
                "token": "secret"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kind": "api#channel",
                "id": "ch-1",
                "resourceId": "res-1",
                "expiration": "1718006400000"
            })))
            .mount(&server)
            .await;

        let channel = calendar(&server)
            .watch(&WatchRequest {
                id: "ch-1".into(),
                address: "https://locsync.test/webhook/calendar".into(),
                token: "secret".into(),
            })
            .await
            .unwrap();

        assert_eq!(channel.resource_id, "res-1");
        assert_eq!(
            channel.expires_at,
            "2024-06-10T08:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[tokio::test]
    async fn test_stop_channel_posts_ids() {
        let server = MockServer::start().await;
        mock_token(&server, "at-1").await;
        Mock::given(method("POST"))
            .and(path("/calendar/v3/channels/stop"))
            .and(body_json(json!({ "id": "ch-1", "resourceId": "res-1" })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let result = calendar(&server).stop_channel("ch-1", "res-1").await;

        assert_eq!(result, Ok(Removal::Removed));
    }

    #[test]
    fn test_calendar_ids_are_escaped_in_paths() {
        let calendar = GoogleCalendar::new(&GoogleSettings {
            calendar_id: "team/room#1@group.calendar.google.com".into(),
            ..GoogleSettings::default()
        })
        .unwrap();

        let url = calendar.events_url(&["evt-1"]);

        assert_eq!(
            url.path(),
            "/calendar/v3/calendars/team%2Froom%231@group.calendar.google.com/events/evt-1"
        );
    }
}
