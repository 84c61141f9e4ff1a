//! REST surface tests driven against a spawned server over localhost.

mod common;

use common::TestServer;
use serde_json::{json, Value};

#[tokio::test]
async fn test_health() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/api/health", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["database"], "ok");
}

#[tokio::test]
async fn test_onboard_and_me() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();

    let user = server.onboard(&client, "yash").await;
    assert_eq!(user["name"], "yash");
    assert_eq!(user["type"], "human");

    // Localhost bypass now resolves to the onboarded human.
    let me: Value = client
        .get(format!("{}/api/users/me", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["id"], user["id"]);

    // Re-onboarding updates in place rather than duplicating.
    let again = server.onboard(&client, "yash2").await;
    assert_eq!(again["id"], user["id"]);
    assert_eq!(again["name"], "yash2");
}

#[tokio::test]
async fn test_seeded_channels_and_welcome() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    let general = server.find_channel(&client, "#general").await;
    server.find_channel(&client, "#random").await;

    let messages: Vec<Value> = client
        .get(format!(
            "{}/api/channels/{}/messages",
            server.base_url,
            general["id"].as_str().unwrap()
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(messages
        .iter()
        .any(|m| m["content"].as_str().unwrap().contains("Welcome to TalkTo")));
    assert!(messages.iter().any(|m| m["sender_name"] == "the_creator"));
}

#[tokio::test]
async fn test_messages_stay_in_channel_with_cursor() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    let general = server.find_channel(&client, "#general").await;
    let random = server.find_channel(&client, "#random").await;
    let general_id = general["id"].as_str().unwrap();
    let random_id = random["id"].as_str().unwrap();

    for i in 0..5 {
        server.post_message(&client, general_id, &format!("g{i}"), None).await;
    }
    server.post_message(&client, random_id, "r0", None).await;

    let page: Vec<Value> = client
        .get(format!(
            "{}/api/channels/{}/messages?limit=3",
            server.base_url, general_id
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page.len(), 3);
    for message in &page {
        assert_eq!(message["channel_id"].as_str().unwrap(), general_id);
    }
    assert_eq!(page[0]["content"], "g4");

    // Page two via the `before` cursor; still only this channel's rows.
    let cursor = page[2]["id"].as_str().unwrap();
    let older: Vec<Value> = client
        .get(format!(
            "{}/api/channels/{}/messages?limit=50&before={}",
            server.base_url, general_id, cursor
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(older.iter().all(|m| m["channel_id"].as_str().unwrap() == general_id));
    assert!(older.iter().any(|m| m["content"] == "g1"));
    assert!(!older.iter().any(|m| m["content"] == "g4"));
    assert!(!older.iter().any(|m| m["content"] == "r0"));
}

#[tokio::test]
async fn test_pin_scoped_and_idempotent() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    let general = server.find_channel(&client, "#general").await;
    let random = server.find_channel(&client, "#random").await;
    let general_id = general["id"].as_str().unwrap();
    let random_id = random["id"].as_str().unwrap();

    let in_general = server.post_message(&client, general_id, "pin me", None).await;
    let in_random = server.post_message(&client, random_id, "other pin", None).await;

    for (channel_id, message) in [(general_id, &in_general), (random_id, &in_random)] {
        let response = client
            .post(format!(
                "{}/api/channels/{}/messages/{}/pin",
                server.base_url,
                channel_id,
                message["id"].as_str().unwrap()
            ))
            .send()
            .await
            .unwrap();
        assert!(response.status().is_success());
    }

    // Pinning twice is a no-op.
    let response = client
        .post(format!(
            "{}/api/channels/{}/messages/{}/pin",
            server.base_url,
            general_id,
            in_general["id"].as_str().unwrap()
        ))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    let pinned: Vec<Value> = client
        .get(format!(
            "{}/api/channels/{}/messages/pinned",
            server.base_url, general_id
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pinned.len(), 1);
    assert_eq!(pinned[0]["id"], in_general["id"]);
}

#[tokio::test]
async fn test_react_toggle() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    let general = server.find_channel(&client, "#general").await;
    let general_id = general["id"].as_str().unwrap();
    let message = server.post_message(&client, general_id, "react to me", None).await;
    let react_url = format!(
        "{}/api/channels/{}/messages/{}/react",
        server.base_url,
        general_id,
        message["id"].as_str().unwrap()
    );

    let first: Value = client
        .post(&react_url)
        .json(&json!({ "emoji": "👍" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(first["added"], true);

    let second: Value = client
        .post(&react_url)
        .json(&json!({ "emoji": "👍" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second["added"], false);

    let reactions: Vec<Value> = client
        .get(format!(
            "{}/api/channels/{}/messages/{}/reactions",
            server.base_url,
            general_id,
            message["id"].as_str().unwrap()
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(reactions.is_empty());
}

#[tokio::test]
async fn test_edit_preserves_identity() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    let general = server.find_channel(&client, "#general").await;
    let general_id = general["id"].as_str().unwrap();
    let message = server.post_message(&client, general_id, "before", None).await;

    let edited: Value = client
        .patch(format!(
            "{}/api/channels/{}/messages/{}",
            server.base_url,
            general_id,
            message["id"].as_str().unwrap()
        ))
        .json(&json!({ "content": "after" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(edited["id"], message["id"]);
    assert_eq!(edited["channel_id"], message["channel_id"]);
    assert_eq!(edited["content"], "after");
    assert!(edited["edited_at"].is_string());
}

#[tokio::test]
async fn test_search_channel_filter_and_escaping() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    let general = server.find_channel(&client, "#general").await;
    let random = server.find_channel(&client, "#random").await;
    server
        .post_message(&client, general["id"].as_str().unwrap(), "banana", None)
        .await;
    server
        .post_message(&client, random["id"].as_str().unwrap(), "banana", None)
        .await;
    server
        .post_message(&client, general["id"].as_str().unwrap(), "a_b", None)
        .await;
    server
        .post_message(&client, general["id"].as_str().unwrap(), "axb", None)
        .await;
    server
        .post_message(&client, general["id"].as_str().unwrap(), "cat", None)
        .await;

    // Text filter AND channel filter together.
    let hits: Vec<Value> = client
        .get(format!(
            "{}/api/search?q=banana&channel=%23general",
            server.base_url
        ))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["channel_name"], "#general");

    // `_` matches literally, not as a wildcard.
    let hits: Vec<Value> = client
        .get(format!("{}/api/search?q=_", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["content"], "a_b");
}

#[tokio::test]
async fn test_channel_create_conflict_and_archive() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    let created = client
        .post(format!("{}/api/channels", server.base_url))
        .json(&json!({ "name": "ideas" }))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status().as_u16(), 201);
    let channel: Value = created.json().await.unwrap();
    assert_eq!(channel["name"], "#ideas");

    let duplicate = client
        .post(format!("{}/api/channels", server.base_url))
        .json(&json!({ "name": "#ideas" }))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status().as_u16(), 409);

    // A channel with messages cannot be deleted, only archived.
    let channel_id = channel["id"].as_str().unwrap();
    server.post_message(&client, channel_id, "keep me", None).await;
    let delete = client
        .delete(format!("{}/api/channels/{}", server.base_url, channel_id))
        .send()
        .await
        .unwrap();
    assert_eq!(delete.status().as_u16(), 409);

    let archive = client
        .post(format!("{}/api/channels/{}/archive", server.base_url, channel_id))
        .send()
        .await
        .unwrap();
    assert!(archive.status().is_success());
}

#[tokio::test]
async fn test_features_vote_upsert() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    // Seeded features exist.
    let features: Vec<Value> = client
        .get(format!("{}/api/features", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(features.len() >= 8);

    let feature_id = features[0]["id"].as_str().unwrap();
    let vote_url = format!("{}/api/features/{}/vote", server.base_url, feature_id);

    let up: Value = client
        .post(&vote_url)
        .json(&json!({ "vote": 1 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(up["vote_count"], 1);

    // Revoting replaces rather than accumulates.
    let down: Value = client
        .post(&vote_url)
        .json(&json!({ "vote": -1 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(down["vote_count"], -1);

    let invalid = client
        .post(&vote_url)
        .json(&json!({ "vote": 5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status().as_u16(), 400);
}

#[tokio::test]
async fn test_api_key_scopes_to_workspace() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    // Localhost bypass is admin of the default workspace.
    let workspaces: Vec<Value> = client
        .get(format!("{}/api/workspaces", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let default_ws = workspaces
        .iter()
        .find(|w| w["slug"] == "default")
        .expect("default workspace");
    let ws_id = default_ws["id"].as_str().unwrap();

    let created: Value = client
        .post(format!("{}/api/workspaces/{}/keys", server.base_url, ws_id))
        .json(&json!({ "name": "ci" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let key = created["key"].as_str().unwrap();
    assert!(key.starts_with("tk_"));
    assert_eq!(created["key_prefix"].as_str().unwrap(), &key[..11]);

    // The key authenticates as workspace admin.
    let me: Value = client
        .get(format!("{}/api/auth/me", server.base_url))
        .header("Authorization", format!("Bearer {key}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["role"], "admin");
    assert_eq!(me["workspace"]["id"].as_str().unwrap(), ws_id);
    assert!(me["user"].is_null());

    // Listing keys never exposes the raw secret.
    let keys: Vec<Value> = client
        .get(format!("{}/api/workspaces/{}/keys", server.base_url, ws_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].get("key_hash").is_none());

    // Revoked keys stop working.
    let key_id = keys[0]["id"].as_str().unwrap();
    let revoke = client
        .delete(format!(
            "{}/api/workspaces/{}/keys/{}",
            server.base_url, ws_id, key_id
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(revoke.status().as_u16(), 204);

    let after = client
        .get(format!("{}/api/auth/me", server.base_url))
        .header("Authorization", format!("Bearer {key}"))
        .send()
        .await
        .unwrap();
    assert_eq!(after.status().as_u16(), 401);
}

#[tokio::test]
async fn test_agents_listing_includes_ghost_flag() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    let agents: Vec<Value> = client
        .get(format!("{}/api/agents", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let creator = agents
        .iter()
        .find(|a| a["agent_name"] == "the_creator")
        .expect("seeded creator agent");
    assert!(creator["is_ghost"].is_boolean());
    assert_eq!(creator["agent_type"], "system");
}

#[tokio::test]
async fn test_message_validation_bounds() {
    let server = TestServer::start().await;
    let client = reqwest::Client::new();
    server.onboard(&client, "op").await;

    let general = server.find_channel(&client, "#general").await;
    let general_id = general["id"].as_str().unwrap();

    let empty = client
        .post(format!("{}/api/channels/{}/messages", server.base_url, general_id))
        .json(&json!({ "content": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(empty.status().as_u16(), 400);

    let oversize = client
        .post(format!("{}/api/channels/{}/messages", server.base_url, general_id))
        .json(&json!({ "content": "x".repeat(32_001) }))
        .send()
        .await
        .unwrap();
    assert_eq!(oversize.status().as_u16(), 400);

    let missing = client
        .get(format!("{}/api/channels/nope/messages", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status().as_u16(), 404);
}
