//! Pull-side orchestration: the current user, the friend list, and one
//! reconciliation pass per list-backed kind, followed by favorite group
//! binding.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use serde_json::{Value, json};

use crate::api::source::endpoints;
use crate::api::{ApiClient, ApiRequest, ListSource, Transport};
use crate::bus::Event;
use crate::cache::{self, Origin, PassToken, Upserted};
use crate::error::{AppError, Result};
use crate::models::{EntityKind, FavoritesConfig, SyncConfig};
use crate::pipeline::bulk::{Bulk, PageParams};
use crate::pipeline::reconcile::{PassSummary, ReconcileOutcome, Reconciler};
use crate::registry::Registry;
use crate::services::binder::{BindReport, FavoriteGroupBinder};

/// Friend list refresh result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FriendSummary {
    pub seen: usize,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Result of [`SyncSession::refresh_all`].
#[derive(Debug, Default)]
pub struct SyncReport {
    pub friends: Option<FriendSummary>,
    pub passes: Vec<PassSummary>,
    pub binding: Option<BindReport>,
    /// Kinds whose refresh failed, with the error text
    pub failures: Vec<(EntityKind, String)>,
    /// At least one endpoint answered 429
    pub rate_limited: bool,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record_failure(&mut self, kind: EntityKind, err: AppError) {
        log::warn!("{} refresh failed: {}", kind, err);
        self.rate_limited |= err.is_rate_limited();
        self.failures.push((kind, err.to_string()));
    }

    fn record_pass(&mut self, outcome: Result<ReconcileOutcome>, kind: EntityKind) {
        match outcome {
            Ok(ReconcileOutcome::Completed(summary)) => self.passes.push(summary),
            Ok(ReconcileOutcome::Skipped) => {}
            Err(e) => self.record_failure(kind, e),
        }
    }
}

pub struct SyncSession<T: Transport + 'static> {
    registry: Rc<Registry>,
    client: Rc<ApiClient<T>>,
    config: SyncConfig,
    reconciler: Reconciler,
    binder: RefCell<FavoriteGroupBinder>,
}

impl<T: Transport + 'static> SyncSession<T> {
    pub fn new(
        registry: Rc<Registry>,
        client: Rc<ApiClient<T>>,
        config: SyncConfig,
        favorites: &FavoritesConfig,
    ) -> Self {
        Self {
            registry,
            client,
            config,
            reconciler: Reconciler::new(),
            binder: RefCell::new(FavoriteGroupBinder::new(favorites)),
        }
    }

    pub fn registry(&self) -> &Rc<Registry> {
        &self.registry
    }

    pub fn binder(&self) -> std::cell::Ref<'_, FavoriteGroupBinder> {
        self.binder.borrow()
    }

    /// Refresh everything. Fails only if the current user cannot be fetched;
    /// per-kind failures are collected in the report.
    pub async fn refresh_all(&self) -> Result<SyncReport> {
        self.fetch_current_user().await?;
        let mut report = SyncReport::default();

        match self.refresh_friends().await {
            Ok(friends) => report.friends = Some(friends),
            Err(e) => report.record_failure(EntityKind::User, e),
        }

        let notifications = ListSource::new(&self.client, endpoints::NOTIFICATIONS);
        let outcome = self
            .reconciler
            .run(
                &self.registry.notifications,
                &notifications,
                self.config.notifications_page_size,
            )
            .await;
        report.record_pass(outcome, EntityKind::Notification);

        let moderations = ListSource::new(&self.client, endpoints::PLAYER_MODERATIONS);
        let outcome = self
            .reconciler
            .run(
                &self.registry.moderations,
                &moderations,
                self.config.moderations_page_size,
            )
            .await;
        report.record_pass(outcome, EntityKind::PlayerModeration);

        let groups = ListSource::new(&self.client, endpoints::FAVORITE_GROUPS);
        let outcome = self
            .reconciler
            .run(
                &self.registry.favorite_groups,
                &groups,
                self.config.favorite_groups_page_size,
            )
            .await;
        report.record_pass(outcome, EntityKind::FavoriteGroup);

        let favorites = ListSource::new(&self.client, endpoints::FAVORITES);
        let outcome = self
            .reconciler
            .run(
                &self.registry.favorites,
                &favorites,
                self.config.favorites_page_size,
            )
            .await;
        report.record_pass(outcome, EntityKind::Favorite);

        report.binding = Some(self.rebind());
        Ok(report)
    }

    /// Re-run favorite group binding against the current caches.
    pub fn rebind(&self) -> BindReport {
        let groups = self.registry.favorite_groups.borrow();
        let mut favorites = self.registry.favorites.borrow_mut();
        self.binder.borrow_mut().rebuild(&groups, &mut favorites)
    }

    /// Fetch and cache the signed-in user.
    pub async fn fetch_current_user(&self) -> Result<String> {
        let response = self
            .client
            .call(ApiRequest::get(endpoints::CURRENT_USER))
            .await?;
        let upserted = self.registry.upsert_user(&response.data)?;
        self.registry.set_current_user_id(upserted.id.clone());
        log::info!("Signed in as {}", upserted.id);
        Ok(upserted.id)
    }

    /// Fetch one user. A response for a different id than requested is
    /// dropped and yields `None`.
    pub async fn fetch_user(&self, user_id: &str) -> Result<Option<Upserted>> {
        let response = self
            .client
            .call(ApiRequest::get(endpoints::user(user_id)))
            .await?;
        let echoed = response.data.get("id").and_then(Value::as_str);
        if echoed != Some(user_id) {
            log::warn!(
                "Dropping user response for {:?}, requested {}",
                echoed,
                user_id
            );
            return Ok(None);
        }
        self.registry.upsert_user(&response.data).map(Some)
    }

    /// Pull the online and offline friend lists. Friends that were cached
    /// but not reported are unfriended; nothing is unfriended on failure.
    ///
    /// Runs as a pass over the user cache: a user a push event touched after
    /// the refresh began keeps the pushed state and is never unfriended.
    pub async fn refresh_friends(&self) -> Result<FriendSummary> {
        let pass = self.registry.users.borrow_mut().begin_pass(|u| u.is_friend);
        let seen = RefCell::new(HashSet::new());
        let added = RefCell::new(Vec::new());

        for offline in [false, true] {
            let source = ListSource::new(&self.client, endpoints::FRIENDS);
            let params = PageParams::new(self.config.friends_page_size)
                .with_query("offline", offline.to_string());
            let result = Bulk::new(params)
                .target(-1)
                .on_page(|items: &[Value]| {
                    for item in items {
                        match self.apply_friend(item, offline, pass) {
                            Ok(Some((id, is_new))) => {
                                if is_new {
                                    added.borrow_mut().push(id.clone());
                                }
                                seen.borrow_mut().insert(id);
                            }
                            Ok(None) => {}
                            Err(e) => log::warn!("Skipping friend entry: {}", e),
                        }
                    }
                })
                .run(&source)
                .await;
            if let Err(e) = result {
                self.registry.users.borrow_mut().abandon_pass(&pass);
                return Err(e);
            }
        }

        let stale: Vec<String> = {
            let mut users = self.registry.users.borrow_mut();
            let stale = users
                .values()
                .filter(|r| {
                    r.data.is_friend
                        && r.meta.expired
                        && r.meta.revision <= pass.started_revision
                })
                .map(|r| r.id().to_string())
                .collect();
            users.abandon_pass(&pass);
            stale
        };
        for id in &stale {
            cache::mutate(&self.registry.users, |users| {
                users.upsert_from(&json!({ "id": id, "isFriend": false }), Origin::Pass(pass))
            })?;
            self.registry.bus.emit(Event::FriendDelete {
                user_id: id.clone(),
            });
        }

        let seen = seen.into_inner();
        let summary = FriendSummary {
            seen: seen.len(),
            added: added.into_inner(),
            removed: stale,
        };
        log::info!(
            "Friends refreshed: {} seen, +{} -{}",
            summary.seen,
            summary.added.len(),
            summary.removed.len()
        );
        Ok(summary)
    }

    /// Upsert one friend list entry. Returns the id and whether the user
    /// became a friend just now. An entry older than a push for the same
    /// user is counted as seen but not applied.
    fn apply_friend(
        &self,
        item: &Value,
        offline: bool,
        pass: PassToken,
    ) -> Result<Option<(String, bool)>> {
        let Some(entry) = item.as_object() else {
            return Ok(None);
        };
        let mut patch = entry.clone();
        let state = if offline {
            "offline"
        } else if entry.get("location").and_then(Value::as_str) == Some("offline") {
            "active"
        } else {
            "online"
        };
        patch.insert("state".into(), json!(state));
        patch.insert("isFriend".into(), json!(true));

        let id = patch
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let was_friend = self
            .registry
            .users
            .borrow()
            .get(&id)
            .is_some_and(|r| r.data.is_friend);

        let upserted = cache::mutate(&self.registry.users, |users| {
            users.upsert_from(&Value::Object(patch), Origin::Pass(pass))
        })?;
        if upserted.stale {
            return Ok(Some((upserted.id, false)));
        }
        if !was_friend {
            let user = self
                .registry
                .users
                .borrow()
                .get(&upserted.id)
                .map(|r| Box::new(r.data.clone()));
            if let Some(user) = user {
                self.registry.bus.emit(Event::FriendAdd { user });
            }
        }
        Ok(Some((upserted.id, !was_friend)))
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::Duration;
    use url::Url;

    use super::*;
    use crate::api::{Method, RawResponse};
    use crate::bus::Channel;
    use crate::error::ApiError;

    /// Serves canned list bodies keyed by path and `offline`, paging by
    /// `n`/`offset`.
    #[derive(Default)]
    struct CannedTransport {
        lists: HashMap<String, Vec<Value>>,
        objects: HashMap<String, Value>,
        rate_limited: HashSet<String>,
        calls: Cell<usize>,
        /// Runs with the list key and offset before a page is served
        hook: Option<Box<dyn Fn(&str, usize)>>,
    }

    #[async_trait(?Send)]
    impl Transport for CannedTransport {
        async fn send(
            &self,
            _method: Method,
            url: &Url,
            _body: Option<&Value>,
        ) -> std::result::Result<RawResponse, ApiError> {
            self.calls.set(self.calls.get() + 1);
            let path = url.path().trim_start_matches("/api/1/").to_string();
            let query: HashMap<String, String> = url.query_pairs().into_owned().collect();

            if self.rate_limited.contains(&path) {
                return Ok(RawResponse {
                    status: 429,
                    body: r#"{"error":{"message":"slow down"}}"#.into(),
                });
            }
            if let Some(object) = self.objects.get(&path) {
                return Ok(RawResponse {
                    status: 200,
                    body: object.to_string(),
                });
            }

            let key = match query.get("offline") {
                Some(offline) => format!("{path}?offline={offline}"),
                None => path,
            };
            let items = self.lists.get(&key).cloned().unwrap_or_default();
            let n: usize = query.get("n").and_then(|v| v.parse().ok()).unwrap_or(100);
            let offset: usize = query.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
            if let Some(hook) = &self.hook {
                hook(&key, offset);
            }
            let page: Vec<Value> = items.into_iter().skip(offset).take(n).collect();
            Ok(RawResponse {
                status: 200,
                body: Value::Array(page).to_string(),
            })
        }
    }

    fn session(transport: CannedTransport) -> SyncSession<CannedTransport> {
        session_with(Registry::new(), transport)
    }

    fn session_with(registry: Rc<Registry>, transport: CannedTransport) -> SyncSession<CannedTransport> {
        let client =
            ApiClient::new(transport, "https://api.example.test/api/1/", Duration::minutes(15))
                .unwrap();
        SyncSession::new(
            registry,
            Rc::new(client),
            SyncConfig::default(),
            &FavoritesConfig::default(),
        )
    }

    fn base_transport() -> CannedTransport {
        let mut transport = CannedTransport::default();
        transport.objects.insert(
            "auth/user".into(),
            json!({ "id": "usr_me", "displayName": "Me" }),
        );
        transport.lists.insert(
            "auth/user/friends?offline=false".into(),
            vec![
                json!({ "id": "usr_1", "displayName": "Alice", "location": "wrld_1:1" }),
                json!({ "id": "usr_2", "displayName": "Bob", "location": "offline" }),
            ],
        );
        transport.lists.insert(
            "auth/user/friends?offline=true".into(),
            vec![json!({ "id": "usr_3", "displayName": "Carol" })],
        );
        transport.lists.insert(
            "auth/user/notifications".into(),
            vec![json!({ "id": "not_1", "type": "friendRequest" })],
        );
        transport.lists.insert(
            "favorite/groups".into(),
            vec![json!({ "id": "fvgrp_1", "name": "group_0", "displayName": "Close", "type": "friend" })],
        );
        transport.lists.insert(
            "favorites".into(),
            vec![json!({ "id": "fvrt_1", "type": "friend", "favoriteId": "usr_1", "tags": ["group_0"] })],
        );
        transport
    }

    #[tokio::test]
    async fn test_refresh_all() {
        let session = session(base_transport());
        let friend_adds = Rc::new(Cell::new(0));
        let c = Rc::clone(&friend_adds);
        session.registry().bus.on(Channel::FriendAdd, move |_| {
            c.set(c.get() + 1);
            Ok(())
        });

        let report = session.refresh_all().await.unwrap();
        assert!(report.is_clean(), "{:?}", report.failures);

        let registry = session.registry();
        assert_eq!(registry.current_user_id().as_deref(), Some("usr_me"));
        let users = registry.users.borrow();
        assert_eq!(users.get("usr_1").unwrap().data.state, "online");
        assert_eq!(users.get("usr_2").unwrap().data.state, "active");
        assert_eq!(users.get("usr_3").unwrap().data.state, "offline");
        assert_eq!(friend_adds.get(), 3);

        assert_eq!(report.passes.len(), 4);
        assert_eq!(registry.notifications.borrow().len(), 1);

        let binding = report.binding.unwrap();
        assert_eq!(binding.orphaned, 0);
        assert_eq!(
            registry.favorites.borrow().get("fvrt_1").unwrap().data.group_ref.as_deref(),
            Some("friend#0")
        );
    }

    #[tokio::test]
    async fn test_dropped_friend_is_removed() {
        let session = session(base_transport());
        session.registry().upsert_user(&json!({ "id": "usr_gone", "isFriend": true })).unwrap();

        let friends = session.refresh_friends().await.unwrap();
        assert_eq!(friends.removed, vec!["usr_gone".to_string()]);
        assert!(!session.registry().users.borrow().get("usr_gone").unwrap().data.is_friend);

        // Second refresh reports nobody new.
        let again = session.refresh_friends().await.unwrap();
        assert!(again.added.is_empty());
        assert!(again.removed.is_empty());
    }

    #[tokio::test]
    async fn test_rate_limited_kind_is_reported() {
        let mut transport = base_transport();
        transport.rate_limited.insert("auth/user/playermoderations".into());
        let session = session(transport);

        let report = session.refresh_all().await.unwrap();
        assert!(report.rate_limited);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, EntityKind::PlayerModeration);
        assert_eq!(report.passes.len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_user_drops_mismatched_echo() {
        let mut transport = CannedTransport::default();
        transport
            .objects
            .insert("users/usr_1".into(), json!({ "id": "usr_other" }));
        transport
            .objects
            .insert("users/usr_2".into(), json!({ "id": "usr_2", "displayName": "Bob" }));
        let session = session(transport);

        assert!(session.fetch_user("usr_1").await.unwrap().is_none());
        assert!(session.fetch_user("usr_2").await.unwrap().unwrap().created);
        assert!(!session.registry().users.borrow().contains("usr_other"));
    }

    #[tokio::test]
    async fn test_pushes_during_friend_refresh_win() {
        use crate::api::PushMessage;
        use crate::pipeline::live::LiveEventRouter;

        for push_during in ["auth/user/friends?offline=false", "auth/user/friends?offline=true"] {
            let registry = Registry::new();
            registry
                .upsert_user(&json!({
                    "id": "usr_1", "isFriend": true, "state": "online", "location": "wrld_1:1"
                }))
                .unwrap();
            let deletes = Rc::new(Cell::new(0));
            let d = Rc::clone(&deletes);
            registry.bus.on(Channel::FriendDelete, move |_| {
                d.set(d.get() + 1);
                Ok(())
            });

            let router = LiveEventRouter::new(Rc::clone(&registry));
            let mut transport = base_transport();
            let target = push_during.to_string();
            transport.hook = Some(Box::new(move |key, offset| {
                if key == target && offset == 0 {
                    router
                        .route(&PushMessage::new("friend-offline", json!({ "userId": "usr_1" })))
                        .unwrap();
                    router
                        .route(&PushMessage::new(
                            "friend-add",
                            json!({ "userId": "usr_new", "user": { "displayName": "Dana" } }),
                        ))
                        .unwrap();
                }
            }));

            let session = session_with(Rc::clone(&registry), transport);
            let friends = session.refresh_friends().await.unwrap();

            assert!(friends.removed.is_empty(), "{push_during}: {:?}", friends.removed);
            assert_eq!(deletes.get(), 0, "{push_during}");
            let users = registry.users.borrow();
            assert!(users.get("usr_new").unwrap().data.is_friend, "{push_during}");
            let usr_1 = &users.get("usr_1").unwrap().data;
            assert!(usr_1.is_friend, "{push_during}");
            assert_eq!(usr_1.state, "offline", "{push_during}");
            assert!(users.values().all(|r| !r.meta.expired));
        }
    }

    #[tokio::test]
    async fn test_failed_friend_refresh_unfriends_nobody() {
        let mut transport = base_transport();
        transport.rate_limited.insert("auth/user/friends".into());
        let session = session(transport);
        session.registry().upsert_user(&json!({ "id": "usr_gone", "isFriend": true })).unwrap();

        assert!(session.refresh_friends().await.is_err());
        let users = session.registry().users.borrow();
        let record = users.get("usr_gone").unwrap();
        assert!(record.data.is_friend);
        assert!(!record.meta.expired);
    }
}
