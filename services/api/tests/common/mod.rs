//! Shared helpers for the API integration tests: an in-memory application with a
//! hand-driven clock, and request helpers built on `oneshot`.

#![allow(dead_code)]

use api_lib::config::Config;
use api_lib::web::{
    build_router,
    state::{AppState, Stores},
};
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use conduz_core::{ManualClock, MemoryStore, RelinkPolicy};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt; // for `oneshot`

pub const PASSWORD: &str = "segredo-123";

pub struct TestApp {
    pub router: Router,
    pub clock: Arc<ManualClock>,
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

pub fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        database_url: "memory".to_string(),
        log_level: tracing::Level::INFO,
        public_base_url: "https://conduz.example".to_string(),
        cors_origin: "http://localhost:3000".to_string(),
        session_ttl: Duration::hours(72),
        invitation_ttl: Duration::days(7),
        invitation_usage_limit: None,
        relink_policy: RelinkPolicy::Reject,
    }
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(test_config())
}

pub fn spawn_app_with(config: Config) -> TestApp {
    spawn_app_with_stores(config, Stores::from_adapter(Arc::new(MemoryStore::new())))
}

pub fn spawn_app_with_stores(config: Config, stores: Stores) -> TestApp {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let state = AppState::new(Arc::new(config), stores, clock.clone());
    TestApp {
        router: build_router(Arc::new(state)),
        clock,
    }
}

impl TestApp {
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Reply {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };

        Reply {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> Reply {
        self.send(Method::GET, uri, token, None).await
    }

    pub async fn post(&self, uri: &str, token: Option<&str>, body: Option<Value>) -> Reply {
        self.send(Method::POST, uri, token, body).await
    }

    /// Registers an instructor and returns their token.
    pub async fn instructor(&self, name: &str, email: &str) -> String {
        let reply = self
            .post(
                "/auth/instructor/register",
                None,
                Some(json!({
                    "name": name,
                    "email": email,
                    "password": PASSWORD,
                    "confirmPassword": PASSWORD,
                    "specialty": "Legislação",
                    "bio": "Instrutora há dez anos"
                })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        token_of(&reply)
    }

    /// Registers a student without an invitation and returns their token.
    pub async fn student(&self, name: &str, email: &str) -> String {
        let reply = self
            .post(
                "/auth/student/register",
                None,
                Some(json!({
                    "name": name,
                    "email": email,
                    "password": PASSWORD,
                    "confirmPassword": PASSWORD
                })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        token_of(&reply)
    }

    pub async fn login(&self, role: &str, email: &str) -> String {
        let reply = self
            .post(
                &format!("/auth/{}/login", role),
                None,
                Some(json!({ "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
        token_of(&reply)
    }

    /// Issues an invitation and returns `(slug, code)`.
    pub async fn invite(&self, instructor_token: &str) -> (String, String) {
        let reply = self.post("/invitations", Some(instructor_token), None).await;
        assert_eq!(reply.status, StatusCode::CREATED, "{}", reply.body);
        (
            reply.body["slug"].as_str().unwrap().to_string(),
            reply.body["code"].as_str().unwrap().to_string(),
        )
    }

    pub async fn validate(&self, slug: &str, code: &str) -> Value {
        let reply = self
            .get(&format!("/invitations/{}/{}/validate", slug, code), None)
            .await;
        assert_eq!(reply.status, StatusCode::OK, "{}", reply.body);
        reply.body
    }

    pub async fn accept(&self, student_token: &str, slug: &str, code: &str) -> Reply {
        self.post(
            &format!("/invitations/{}/{}/accept", slug, code),
            Some(student_token),
            None,
        )
        .await
    }
}

pub fn token_of(reply: &Reply) -> String {
    reply.body["token"].as_str().unwrap().to_string()
}
