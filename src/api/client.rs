//! Authenticated XRPC client with single-flight token refresh

use std::sync::Arc;

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::auth::Credentials;
use crate::models::{Account, FeedId, ThreadNode};
use crate::session::SessionStore;

use super::types::{
    ActorSearchPage, ConversationPage, CreateRecordRequest, CreateRecordResponse,
    CreateSessionRequest, DeleteRecordRequest, FollowRecord, GetFeedGeneratorsResponse,
    GetFeedResponse, GetMessagesResponse, GetPostThreadResponse, GetPreferencesResponse,
    KnownPreference, ListConvosResponse, MessageInput, MessagePage, PostRecord, PostSearchPage,
    Preference, Profile, PutPreferencesRequest, RecordRef, SearchActorsResponse,
    SearchPostsResponse, SendMessageRequest, SessionResponse, SubjectRecord, WireError,
    WirePostView, format_timestamp,
};
use super::{Atproto, ClientError, FeedPage};

/// Default PDS URL for Bluesky
pub const DEFAULT_PDS_URL: &str = "https://bsky.social";

/// Service proxy header value routing chat calls to the chat appview
const CHAT_SERVICE_PROXY: &str = "did:web:api.bsky.chat#bsky_chat";

/// Authenticated XRPC client
///
/// Borrows the active account's credentials from the session store on every
/// call, so an account switch takes effect on the next request without
/// rebuilding the client.
pub struct AtpClient {
    http: Client,
    store: Arc<SessionStore>,
    /// Serializes concurrent refresh exchanges: when N in-flight calls see
    /// an expired token at once, exactly one performs the exchange and the
    /// rest pick up the rotated tokens.
    refresh_lock: Mutex<()>,
}

/// Snapshot of the active account and its tokens, taken per call
struct ActiveSession {
    account: Account,
    credentials: Credentials,
}

impl AtpClient {
    /// Create a client over the given session store
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self::with_http(Client::new(), store)
    }

    /// Create a client with a caller-built `reqwest::Client` (custom
    /// timeouts, proxies)
    pub fn with_http(http: Client, store: Arc<SessionStore>) -> Self {
        Self {
            http,
            store,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Log in with an identifier and app password
    ///
    /// Returns the account record and tokens for the session store; does not
    /// touch the store itself.
    pub async fn login(
        pds_url: &str,
        identifier: &str,
        app_password: &str,
    ) -> Result<(Account, Credentials), ClientError> {
        let pds_url = pds_url.trim_end_matches('/');
        let url = format!("{pds_url}/xrpc/com.atproto.server.createSession");

        let request = CreateSessionRequest {
            identifier: identifier.to_string(),
            password: app_password.to_string(),
        };

        let response = Client::new().post(&url).json(&request).send().await?;
        let session: SessionResponse = read_json(response).await?;

        let account = Account::new(&session.did, &session.handle, &session.handle, pds_url);
        let credentials = Credentials {
            access_jwt: session.access_jwt,
            refresh_jwt: session.refresh_jwt,
        };
        Ok((account, credentials))
    }

    fn active_session(&self) -> Result<ActiveSession, ClientError> {
        let account = self
            .store
            .active_account()
            .ok_or(ClientError::NotAuthenticated)?;
        let credentials = self
            .store
            .credentials_for(&account)
            .map_err(|e| ClientError::Storage(e.to_string()))?
            .ok_or(ClientError::NotAuthenticated)?;
        Ok(ActiveSession {
            account,
            credentials,
        })
    }

    /// Issue a GET query; on an expired token, refresh once and retry once
    async fn xrpc_get<T: DeserializeOwned>(
        &self,
        nsid: &str,
        params: &[(&str, String)],
        proxy: Option<&str>,
    ) -> Result<T, ClientError> {
        let mut refreshed = false;
        loop {
            let session = self.active_session()?;
            let url = format!("{}/xrpc/{}", session.account.pds_host, nsid);
            let mut request = self
                .http
                .get(&url)
                .query(params)
                .bearer_auth(&session.credentials.access_jwt);
            if let Some(proxy) = proxy {
                request = request.header("atproto-proxy", proxy);
            }

            let response = request.send().await?;
            match read_json(response).await {
                Err(err) if err.is_expired_token() && !refreshed => {
                    self.refresh_session(&session).await?;
                    refreshed = true;
                }
                other => return other,
            }
        }
    }

    /// Issue a POST procedure; same refresh-and-retry-once contract
    async fn xrpc_procedure<B: Serialize, T: DeserializeOwned>(
        &self,
        nsid: &str,
        body: &B,
        proxy: Option<&str>,
    ) -> Result<T, ClientError> {
        let mut refreshed = false;
        loop {
            let session = self.active_session()?;
            let url = format!("{}/xrpc/{}", session.account.pds_host, nsid);
            let mut request = self
                .http
                .post(&url)
                .json(body)
                .bearer_auth(&session.credentials.access_jwt);
            if let Some(proxy) = proxy {
                request = request.header("atproto-proxy", proxy);
            }

            let response = request.send().await?;
            match read_json(response).await {
                Err(err) if err.is_expired_token() && !refreshed => {
                    self.refresh_session(&session).await?;
                    refreshed = true;
                }
                other => return other,
            }
        }
    }

    /// POST procedure whose response body is ignored
    async fn xrpc_procedure_unit<B: Serialize>(
        &self,
        nsid: &str,
        body: &B,
    ) -> Result<(), ClientError> {
        let mut refreshed = false;
        loop {
            let session = self.active_session()?;
            let url = format!("{}/xrpc/{}", session.account.pds_host, nsid);
            let response = self
                .http
                .post(&url)
                .json(body)
                .bearer_auth(&session.credentials.access_jwt)
                .send()
                .await?;

            match read_unit(response).await {
                Err(err) if err.is_expired_token() && !refreshed => {
                    self.refresh_session(&session).await?;
                    refreshed = true;
                }
                other => return other,
            }
        }
    }

    /// Exchange the refresh token for a new token pair
    ///
    /// Single-flight: concurrent callers queue on the lock, and whoever
    /// enters after the exchange finds the tokens already rotated and
    /// returns without a second exchange. A failed exchange is fatal for the
    /// session and forces re-login.
    async fn refresh_session(&self, stale: &ActiveSession) -> Result<(), ClientError> {
        let _guard = self.refresh_lock.lock().await;

        // The account may have been switched or refreshed while we waited.
        let Some(account) = self.store.active_account() else {
            return Err(ClientError::NotAuthenticated);
        };
        if account.id != stale.account.id {
            return Ok(());
        }
        let current = self
            .store
            .credentials_for(&account)
            .map_err(|e| ClientError::Storage(e.to_string()))?
            .ok_or(ClientError::NotAuthenticated)?;
        if current.access_jwt != stale.credentials.access_jwt {
            return Ok(());
        }

        tracing::debug!(account = %account.handle, "refreshing expired session");

        let url = format!(
            "{}/xrpc/com.atproto.server.refreshSession",
            account.pds_host
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(&current.refresh_jwt)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            let wire: WireError = serde_json::from_str(&text).unwrap_or_default();
            tracing::warn!(account = %account.handle, error = %wire.error, "session refresh failed");
            return Err(ClientError::SessionExpired(if wire.message.is_empty() {
                format!("refresh returned {status}")
            } else {
                wire.message
            }));
        }

        let session: SessionResponse = serde_json::from_str(&text)?;
        let rotated = Credentials {
            access_jwt: session.access_jwt,
            refresh_jwt: session.refresh_jwt,
        };
        self.store
            .update_tokens(&account, &rotated)
            .map_err(|e| ClientError::Storage(e.to_string()))?;

        Ok(())
    }

    // ==================== Writes ====================

    /// Create a record in the active account's repo
    async fn create_record<R: Serialize>(
        &self,
        collection: &str,
        record: &R,
    ) -> Result<CreateRecordResponse, ClientError> {
        let session = self.active_session()?;
        let request = CreateRecordRequest {
            repo: session.account.did,
            collection: collection.to_string(),
            record,
        };
        self.xrpc_procedure("com.atproto.repo.createRecord", &request, None)
            .await
    }

    /// Publish a text post; returns (uri, cid)
    pub async fn create_post(&self, text: &str) -> Result<(String, String), ClientError> {
        let record = PostRecord {
            text: text.to_string(),
            created_at: format_timestamp(Utc::now()),
            r#type: "app.bsky.feed.post".to_string(),
        };
        let created = self.create_record("app.bsky.feed.post", &record).await?;
        Ok((created.uri, created.cid))
    }

    /// Follow an actor; returns the created follow record's URI
    pub async fn create_follow(&self, did: &str) -> Result<String, ClientError> {
        let record = FollowRecord {
            subject: did.to_string(),
            created_at: format_timestamp(Utc::now()),
            r#type: "app.bsky.graph.follow".to_string(),
        };
        let created = self.create_record("app.bsky.graph.follow", &record).await?;
        Ok(created.uri)
    }

    // ==================== Reads ====================

    /// Fetch an actor profile
    pub async fn profile(&self, actor: &str) -> Result<Profile, ClientError> {
        self.xrpc_get(
            "app.bsky.actor.getProfile",
            &[("actor", actor.to_string())],
            None,
        )
        .await
    }

    /// Search posts
    pub async fn search_posts(
        &self,
        query: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<PostSearchPage, ClientError> {
        let mut params = vec![("q", query.to_string()), ("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        let response: SearchPostsResponse = self
            .xrpc_get("app.bsky.feed.searchPosts", &params, None)
            .await?;
        Ok(PostSearchPage {
            posts: response
                .posts
                .into_iter()
                .map(WirePostView::into_post)
                .collect(),
            cursor: response.cursor,
        })
    }

    /// Search actors
    pub async fn search_actors(
        &self,
        query: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<ActorSearchPage, ClientError> {
        let mut params = vec![("q", query.to_string()), ("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        let response: SearchActorsResponse = self
            .xrpc_get("app.bsky.actor.searchActors", &params, None)
            .await?;
        Ok(ActorSearchPage {
            actors: response.actors,
            cursor: response.cursor,
        })
    }

    // ==================== Preferences ====================

    /// Read the full preferences list
    pub async fn preferences(&self) -> Result<Vec<Preference>, ClientError> {
        let response: GetPreferencesResponse = self
            .xrpc_get("app.bsky.actor.getPreferences", &[], None)
            .await?;
        Ok(response.preferences)
    }

    /// Write the full preferences list
    ///
    /// Callers must write back every entry they read, including unknown
    /// ones, or the server-side list loses them.
    pub async fn put_preferences(&self, preferences: Vec<Preference>) -> Result<(), ClientError> {
        let request = PutPreferencesRequest { preferences };
        self.xrpc_procedure_unit("app.bsky.actor.putPreferences", &request)
            .await
    }

    /// Resolve feed generator URIs to display names
    async fn feed_generators(&self, uris: &[String]) -> Result<Vec<FeedId>, ClientError> {
        if uris.is_empty() {
            return Ok(Vec::new());
        }
        let params: Vec<(&str, String)> = uris.iter().map(|uri| ("feeds", uri.clone())).collect();
        let response: GetFeedGeneratorsResponse = self
            .xrpc_get("app.bsky.feed.getFeedGenerators", &params, None)
            .await?;
        Ok(response
            .feeds
            .into_iter()
            .map(|feed| FeedId::generator(&feed.uri, &feed.display_name))
            .collect())
    }

    // ==================== Chat ====================

    /// List the user's chat conversations
    pub async fn list_conversations(
        &self,
        cursor: Option<&str>,
    ) -> Result<ConversationPage, ClientError> {
        let mut params = Vec::new();
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        let response: ListConvosResponse = self
            .xrpc_get("chat.bsky.convo.listConvos", &params, Some(CHAT_SERVICE_PROXY))
            .await?;
        Ok(ConversationPage {
            conversations: response.convos,
            cursor: response.cursor,
        })
    }

    /// Fetch messages in a conversation, newest first
    pub async fn conversation_messages(
        &self,
        convo_id: &str,
        cursor: Option<&str>,
    ) -> Result<MessagePage, ClientError> {
        let mut params = vec![("convoId", convo_id.to_string())];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }
        let response: GetMessagesResponse = self
            .xrpc_get("chat.bsky.convo.getMessages", &params, Some(CHAT_SERVICE_PROXY))
            .await?;
        Ok(MessagePage {
            messages: response.messages,
            cursor: response.cursor,
        })
    }

    /// Send a chat message
    pub async fn send_message(
        &self,
        convo_id: &str,
        text: &str,
    ) -> Result<super::types::ChatMessage, ClientError> {
        let request = SendMessageRequest {
            convo_id: convo_id.to_string(),
            message: MessageInput {
                text: text.to_string(),
            },
        };
        self.xrpc_procedure("chat.bsky.convo.sendMessage", &request, Some(CHAT_SERVICE_PROXY))
            .await
    }
}

impl Atproto for AtpClient {
    async fn timeline(
        &self,
        feed: &FeedId,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<FeedPage, ClientError> {
        let mut params = vec![("limit", limit.to_string())];
        if let Some(cursor) = cursor {
            params.push(("cursor", cursor.to_string()));
        }

        let response: GetFeedResponse = match &feed.uri {
            Some(uri) => {
                params.push(("feed", uri.clone()));
                self.xrpc_get("app.bsky.feed.getFeed", &params, None).await?
            }
            None => {
                self.xrpc_get("app.bsky.feed.getTimeline", &params, None)
                    .await?
            }
        };

        Ok(FeedPage {
            entries: response
                .feed
                .into_iter()
                .map(super::types::WireFeedViewPost::into_entry)
                .collect(),
            cursor: response.cursor,
        })
    }

    async fn thread(&self, uri: &str, depth: u32) -> Result<ThreadNode, ClientError> {
        let params = [
            ("uri", uri.to_string()),
            ("depth", depth.to_string()),
        ];
        let response: GetPostThreadResponse = self
            .xrpc_get("app.bsky.feed.getPostThread", &params, None)
            .await?;

        let unavailable = response
            .thread
            .unavailable_uri()
            .map(str::to_string);
        response.thread.into_node().ok_or_else(|| {
            ClientError::Unavailable(unavailable.unwrap_or_else(|| uri.to_string()))
        })
    }

    async fn create_like(&self, uri: &str, cid: &str) -> Result<String, ClientError> {
        let record = SubjectRecord {
            subject: RecordRef {
                uri: uri.to_string(),
                cid: cid.to_string(),
            },
            created_at: format_timestamp(Utc::now()),
            r#type: "app.bsky.feed.like".to_string(),
        };
        let created = self.create_record("app.bsky.feed.like", &record).await?;
        Ok(created.uri)
    }

    async fn create_repost(&self, uri: &str, cid: &str) -> Result<String, ClientError> {
        let record = SubjectRecord {
            subject: RecordRef {
                uri: uri.to_string(),
                cid: cid.to_string(),
            },
            created_at: format_timestamp(Utc::now()),
            r#type: "app.bsky.feed.repost".to_string(),
        };
        let created = self.create_record("app.bsky.feed.repost", &record).await?;
        Ok(created.uri)
    }

    async fn delete_record(&self, record_uri: &str) -> Result<(), ClientError> {
        let (repo, collection, rkey) = split_at_uri(record_uri)?;
        let request = DeleteRecordRequest {
            repo: repo.to_string(),
            collection: collection.to_string(),
            rkey: rkey.to_string(),
        };
        self.xrpc_procedure_unit("com.atproto.repo.deleteRecord", &request)
            .await
    }

    async fn pinned_feeds(&self) -> Result<Vec<FeedId>, ClientError> {
        let preferences = self.preferences().await?;
        let pinned = preferences
            .iter()
            .find_map(|pref| match pref {
                Preference::Known(KnownPreference::SavedFeeds { pinned, .. }) => {
                    Some(pinned.clone())
                }
                Preference::Unknown(_) => None,
            })
            .unwrap_or_default();

        let mut feeds = vec![FeedId::following()];
        feeds.extend(self.feed_generators(&pinned).await?);
        Ok(feeds)
    }
}

/// Split an at:// record URI into (repo, collection, rkey)
fn split_at_uri(uri: &str) -> Result<(&str, &str, &str), ClientError> {
    let rest = uri
        .strip_prefix("at://")
        .ok_or_else(|| ClientError::InvalidUri(uri.to_string()))?;
    let mut parts = rest.splitn(3, '/');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(repo), Some(collection), Some(rkey))
            if !repo.is_empty() && !collection.is_empty() && !rkey.is_empty() =>
        {
            Ok((repo, collection, rkey))
        }
        _ => Err(ClientError::InvalidUri(uri.to_string())),
    }
}

/// Decode a response, mapping non-success statuses to `ClientError::Server`
async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        let wire: WireError = serde_json::from_str(&text).unwrap_or_default();
        return Err(ClientError::Server {
            status: status.as_u16(),
            error: wire.error,
            message: wire.message,
        });
    }
    serde_json::from_str(&text).map_err(Into::into)
}

/// Like `read_json`, but the success body is ignored
async fn read_unit(response: reqwest::Response) -> Result<(), ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let text = response.text().await?;
    let wire: WireError = serde_json::from_str(&text).unwrap_or_default();
    Err(ClientError::Server {
        status: status.as_u16(),
        error: wire.error,
        message: wire.message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_at_uri() {
        let (repo, collection, rkey) =
            split_at_uri("at://did:plc:abc/app.bsky.feed.like/3k2aaaa").unwrap();
        assert_eq!(repo, "did:plc:abc");
        assert_eq!(collection, "app.bsky.feed.like");
        assert_eq!(rkey, "3k2aaaa");

        assert!(split_at_uri("https://example.com/x").is_err());
        assert!(split_at_uri("at://did:plc:abc/only-two").is_err());
    }
}
