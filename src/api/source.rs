//! Page source for list endpoints.

use async_trait::async_trait;
use serde_json::Value;

use crate::api::{ApiClient, ApiRequest, Transport};
use crate::error::{AppError, Result};
use crate::pipeline::{Page, PageParams, PageSource};

/// List endpoints the reconciliation passes read from.
pub mod endpoints {
    pub const CURRENT_USER: &str = "auth/user";
    pub const FRIENDS: &str = "auth/user/friends";
    pub const NOTIFICATIONS: &str = "auth/user/notifications";
    pub const PLAYER_MODERATIONS: &str = "auth/user/playermoderations";
    pub const FAVORITES: &str = "favorites";
    pub const FAVORITE_GROUPS: &str = "favorite/groups";

    pub fn user(id: &str) -> String {
        format!("users/{id}")
    }

    pub fn world(id: &str) -> String {
        format!("worlds/{id}")
    }
}

/// Pages through a list endpoint with `n` / `offset` query parameters.
pub struct ListSource<'a, T: Transport + 'static> {
    client: &'a ApiClient<T>,
    endpoint: String,
}

impl<'a, T: Transport + 'static> ListSource<'a, T> {
    pub fn new(client: &'a ApiClient<T>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait(?Send)]
impl<T: Transport + 'static> PageSource for ListSource<'_, T> {
    type Item = Value;

    async fn fetch_page(&self, params: &PageParams) -> Result<Page<Value>> {
        let mut request = ApiRequest::get(self.endpoint.clone());
        for (key, value) in &params.query {
            request = request.with_query(key.clone(), value);
        }
        let request = request
            .with_query("n", params.n)
            .with_query("offset", params.offset);

        match self.client.call(request).await?.data {
            Value::Array(items) => Ok(Page::new(items)),
            other => Err(AppError::payload(format!(
                "{} returned {} instead of a list",
                self.endpoint,
                kind_name(&other)
            ))),
        }
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
