//! Tests for the platform adapters

use super::*;
use crate::activity::generate_source_id_hash;
use crate::checkpoint::{Checkpoint, CommentFeed, CompositeEndpoint, EndpointId, ReachSubject};
use crate::engine::{
    iterate, Handoff, Iteration, LastRecord, PageResponse, RateSignal, RunMode, RunOutcome,
};
use crate::error::Error;
use crate::http::RetryPolicy;
use crate::pool::{Credential, CredentialPool, PoolConfig, PooledCaller};
use crate::queue::MemoryQueue;
use crate::store::{FileIntegrationStore, IntegrationStatus, MemorySink};
use chrono::TimeZone;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

// ============================================================================
// Fixtures
// ============================================================================

/// Source answering from scripted pages keyed by `usecase|arg|page`
#[derive(Default)]
struct FakeSource {
    pages: Mutex<HashMap<String, VecDeque<Result<PageResponse>>>>,
    requests: Mutex<Vec<FetchRequest>>,
}

fn source_key(usecase: &str, arg: &JsonValue, page: &str) -> String {
    format!("{usecase}|{arg}|{page}")
}

impl FakeSource {
    fn respond(&self, usecase: &str, arg: JsonValue, page: &str, response: PageResponse) {
        self.push(usecase, arg, page, Ok(response));
    }

    fn fail(&self, usecase: &str, arg: JsonValue, page: &str, error: Error) {
        self.push(usecase, arg, page, Err(error));
    }

    fn push(&self, usecase: &str, arg: JsonValue, page: &str, result: Result<PageResponse>) {
        self.pages
            .lock()
            .unwrap()
            .entry(source_key(usecase, &arg, page))
            .or_default()
            .push_back(result);
    }

    fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn usecases(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.usecase).collect()
    }
}

#[async_trait]
impl PlatformSource for FakeSource {
    async fn fetch(&self, request: FetchRequest) -> Result<PageResponse> {
        let key = source_key(&request.usecase, &request.arg, &request.page);
        self.requests.lock().unwrap().push(request);
        self.pages
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(PageResponse::default()))
    }
}

struct Harness {
    source: Arc<FakeSource>,
    sink: MemorySink,
    queue: MemoryQueue,
    store: FileIntegrationStore,
    started_at: DateTime<Utc>,
}

impl Harness {
    fn new() -> Self {
        Self {
            source: Arc::new(FakeSource::default()),
            sink: MemorySink::new(),
            queue: MemoryQueue::new(),
            store: FileIntegrationStore::in_memory(),
            started_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        }
    }

    fn ctx(&self, onboarding: bool) -> AdapterContext {
        AdapterContext::new(
            "t1",
            Arc::new(self.sink.clone()),
            Arc::new(self.queue.clone()),
            Arc::new(self.store.clone()),
        )
        .with_onboarding(onboarding)
        .with_started_at(self.started_at)
    }

    fn dyn_source(&self) -> Arc<dyn PlatformSource> {
        self.source.clone()
    }
}

async fn run<A: PlatformAdapter>(
    adapter: &mut A,
    onboarding: bool,
    limit: Option<usize>,
) -> RunOutcome {
    let iteration = Iteration::new(
        adapter.universe(),
        Checkpoint::empty(),
        onboarding,
        adapter.global_limit(limit),
        0,
    );
    iterate(adapter, iteration, RunMode::short_lived_default())
        .await
        .unwrap()
        .outcome
}

fn last(source_id: &str, timestamp: DateTime<Utc>) -> LastRecord {
    LastRecord {
        source_id: source_id.to_string(),
        timestamp,
    }
}

// ============================================================================
// Record Helper Tests
// ============================================================================

#[test]
fn test_record_timestamp_formats() {
    let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(record_timestamp(&json!("2024-01-01T00:00:00Z")), Some(expected));
    assert_eq!(record_timestamp(&json!(1_704_067_200)), Some(expected));
    assert_eq!(record_timestamp(&json!("1704067200.000")), Some(expected));
    assert_eq!(record_timestamp(&json!(null)), None);
    assert_eq!(record_timestamp(&json!("yesterday")), None);
}

#[test]
fn test_decode_record_error() {
    let err = decode_record::<ChannelInfo>(json!({"id": 1}), "channel").unwrap_err();
    assert!(matches!(err, Error::Decode { .. }));
}

// ============================================================================
// Chat Adapter Tests
// ============================================================================

fn chat_settings() -> IntegrationSettings {
    let mut settings = IntegrationSettings::default();
    settings.channels = vec![
        ChannelInfo::new("C1", "general"),
        ChannelInfo::new("C2", "random").newly_added(),
    ];
    settings.members.insert("U1".to_string(), "alice".to_string());
    settings
}

fn message(id: &str, author: &str, text: &str) -> JsonValue {
    json!({
        "id": id,
        "text": text,
        "createdAt": "2024-01-01T11:30:00Z",
        "author": { "id": author },
        "url": format!("https://chat.example.com/{id}"),
    })
}

#[tokio::test]
async fn test_chat_run_visits_threads_before_next_channel() {
    let h = Harness::new();
    h.source.respond(
        "members",
        json!("G1"),
        "",
        PageResponse::last(vec![
            json!({ "id": "U2", "username": "bob" }),
            json!({ "id": "B1", "username": "helper", "isBot": true }),
            json!({ "id": "S1", "username": "Slackbot" }),
        ]),
    );
    let mut threaded = message("m1", "U1", "hi <@U2>");
    threaded["hasThread"] = json!(true);
    threaded["threadId"] = json!("T1");
    h.source.respond(
        "messages",
        json!("C1"),
        "",
        PageResponse::last(vec![threaded, message("m2", "U9", "who am i")]),
    );
    h.source.respond(
        "thread-messages",
        json!({ "channelId": "C1", "threadId": "T1" }),
        "",
        PageResponse::last(vec![message("r1", "U2", "reply")]),
    );
    h.source.respond(
        "messages",
        json!("C2"),
        "",
        PageResponse::last(vec![message("m3", "U2", "<b>bold</b>")]),
    );

    let mut adapter = ChatAdapter::new(h.ctx(true), h.dyn_source(), "G1", chat_settings());
    let outcome = run(&mut adapter, true, None).await;
    assert!(outcome.is_completed());

    assert_eq!(
        h.source.usecases(),
        vec!["members", "messages", "thread-messages", "messages"]
    );

    let activities = h.sink.activities().await;
    let ids: Vec<&str> = activities.iter().map(|a| a.source_id.as_str()).collect();
    assert_eq!(ids, vec!["U2", "m1", "r1", "m3"]);

    let join = &activities[0];
    assert_eq!(join.activity_type, "channel_joined");
    assert_eq!(join.timestamp, DateTime::<Utc>::UNIX_EPOCH);
    assert_eq!((join.score, join.is_key_action), (3, false));

    let opener = &activities[1];
    assert_eq!(opener.attributes["body"], "hi @bob");
    assert_eq!(opener.attributes["channel"], "general");
    assert_eq!(opener.attributes["thread"], false);
    assert_eq!((opener.score, opener.is_key_action), (6, true));

    let reply = &activities[2];
    assert_eq!(reply.source_parent_id.as_deref(), Some("T1"));
    assert_eq!(reply.attributes["thread"], json!({ "body": "hi @bob", "id": "T1" }));

    assert_eq!(activities[3].attributes["body"], "bold");

    // Settings are written back with the new member and no new channels
    let saved = h.store.load_settings("t1", Integration::Slack).await.unwrap();
    assert_eq!(saved.members.get("U2").map(String::as_str), Some("bob"));
    assert!(!saved.members.contains_key("B1"));
    assert!(saved.channels.iter().all(|c| !c.new));
    assert_eq!(
        h.store.status("t1", Integration::Slack).await.unwrap(),
        Some(IntegrationStatus::Done)
    );
}

#[tokio::test]
async fn test_chat_finished_policy() {
    let h = Harness::new();
    let adapter = ChatAdapter::new(h.ctx(false), h.dyn_source(), "G1", chat_settings());
    let members = EndpointId::simple("members");
    let old = h.started_at - chrono::Duration::hours(2);
    let recent = h.started_at - chrono::Duration::minutes(5);

    assert!(adapter.is_endpoint_finished(&members, &last("U1", recent), &[]));
    assert!(!adapter.is_endpoint_finished(&members, &last("U7", recent), &[]));

    let general = EndpointId::simple("C1");
    assert!(adapter.is_endpoint_finished(&general, &last("m", old), &[]));
    assert!(!adapter.is_endpoint_finished(&general, &last("m", recent), &[]));

    // Newly added channels are never caught up by age
    let random = EndpointId::simple("C2");
    assert!(!adapter.is_endpoint_finished(&random, &last("m", old), &[]));
}

#[tokio::test]
async fn test_chat_retries_gateway_errors() {
    let h = Harness::new();
    h.source.fail("messages", json!("C1"), "", Error::http_status(502, "bad gateway"));
    h.source.respond(
        "messages",
        json!("C1"),
        "",
        PageResponse::last(vec![message("m1", "U1", "hello")]),
    );

    let adapter = ChatAdapter::new(h.ctx(false), h.dyn_source(), "G1", chat_settings())
        .with_retry(RetryPolicy::new(3, Duration::ZERO));
    let page = adapter.get(&EndpointId::simple("C1"), "").await.unwrap();
    assert_eq!(page.records.len(), 1);
    assert_eq!(h.source.requests().len(), 2);
}

#[tokio::test]
async fn test_chat_unknown_channel_is_contract_error() {
    let h = Harness::new();
    let adapter = ChatAdapter::new(h.ctx(false), h.dyn_source(), "G1", chat_settings());
    let err = adapter.get(&EndpointId::simple("C404"), "").await.unwrap_err();
    assert!(matches!(err, Error::Contract { .. }));
}

#[tokio::test]
async fn test_chat_handoff_carries_guild() {
    let h = Harness::new();
    let mut adapter = ChatAdapter::new(
        h.ctx(true).with_integration_id("int-1"),
        h.dyn_source(),
        "G1",
        chat_settings(),
    );
    let checkpoint =
        Checkpoint::at(EndpointId::simple("C1"), "p2", vec![EndpointId::simple("C1")]);
    let handoff = Handoff {
        checkpoint: checkpoint.clone(),
        wait_seconds: 30,
        limit_count: 7,
    };
    adapter.on_limit_reached(&handoff).await.unwrap();

    let message = h.queue.pop("slack:t1").await.unwrap();
    assert_eq!(message.state, checkpoint);
    assert_eq!(message.sleep, 30);
    assert_eq!(message.limit_count, 7);
    assert!(message.onboarding);
    assert_eq!(message.integration_id.as_deref(), Some("int-1"));
    assert_eq!(message.args.guild_id.as_deref(), Some("G1"));
}

// ============================================================================
// Social Adapter Tests
// ============================================================================

fn post(id: &str, username: &str) -> JsonValue {
    json!({
        "id": id,
        "text": "<p>hello</p>",
        "createdAt": "2024-01-01T11:00:00Z",
        "url": format!("https://twitter.com/{username}/status/{id}"),
        "author": { "id": format!("u-{username}"), "username": username, "followersCount": 12 },
    })
}

fn known_followers() -> IntegrationSettings {
    let mut settings = IntegrationSettings::default();
    settings.followers.insert("f1".to_string());
    settings
}

#[tokio::test]
async fn test_social_followers_dedup_and_catch_up() {
    let h = Harness::new();
    let mut adapter =
        SocialAdapter::new(h.ctx(true), h.dyn_source(), "P1", vec![], known_followers());
    let followers = EndpointId::simple("followers");

    let outcome = adapter
        .parse_and_write(
            vec![
                json!({ "id": "f2", "username": "bob", "followersCount": 3 }),
                json!({ "id": "f1", "username": "alice" }),
            ],
            &followers,
        )
        .await
        .unwrap();

    assert_eq!(outcome.activities.len(), 1);
    let follow = &outcome.activities[0];
    assert_eq!(
        follow.source_id,
        generate_source_id_hash("bob", "follow", "0", "twitter").unwrap()
    );
    assert_eq!(follow.timestamp, DateTime::<Utc>::UNIX_EPOCH);
    assert_eq!(follow.member.reach, Some(3));
    assert_eq!(follow.attributes["url"], "https://twitter.com/bob");

    assert!(adapter.followers().contains("f2"));
    let last_record = outcome.last_record.unwrap();
    assert!(!adapter.is_endpoint_finished(&followers, &last_record, &outcome.activities));

    let repeat = adapter
        .parse_and_write(
            vec![
                json!({ "id": "f1", "username": "alice" }),
                json!({ "id": "f2", "username": "bob" }),
            ],
            &followers,
        )
        .await
        .unwrap();
    assert!(repeat.activities.is_empty());
    let last_record = repeat.last_record.unwrap();
    assert!(adapter.is_endpoint_finished(&followers, &last_record, &repeat.activities));
}

#[tokio::test]
async fn test_social_mixed_follower_page_keeps_going() {
    let h = Harness::new();
    let mut adapter = SocialAdapter::new(
        h.ctx(false),
        h.dyn_source(),
        "P1",
        vec![],
        known_followers(),
    );
    let followers = EndpointId::simple("followers");

    let outcome = adapter
        .parse_and_write(
            vec![
                json!({ "id": "f1", "username": "alice" }),
                json!({ "id": "f2", "username": "bob" }),
                json!({ "id": "f3", "username": "carol" }),
            ],
            &followers,
        )
        .await
        .unwrap();

    assert_eq!(outcome.activities.len(), 2);
    let last_record = outcome.last_record.clone().unwrap();
    assert!(!adapter.is_endpoint_finished(&followers, &last_record, &outcome.activities));
}

#[tokio::test]
async fn test_social_empty_follower_page_is_not_caught_up() {
    let h = Harness::new();
    let mut adapter = SocialAdapter::new(
        h.ctx(false),
        h.dyn_source(),
        "P1",
        vec![],
        known_followers(),
    );
    let followers = EndpointId::simple("followers");

    let outcome = adapter.parse_and_write(vec![], &followers).await.unwrap();
    assert!(outcome.activities.is_empty());

    let last_record = LastRecord {
        source_id: "f1".to_string(),
        timestamp: Utc::now(),
    };
    assert!(!adapter.is_endpoint_finished(&followers, &last_record, &outcome.activities));
}

#[tokio::test]
async fn test_social_seen_followers_survive_handoff() {
    let h = Harness::new();
    let mut adapter = SocialAdapter::new(
        h.ctx(false),
        h.dyn_source(),
        "P1",
        vec![],
        known_followers(),
    )
    .with_seen_followers(["f2".to_string()].into_iter().collect());
    assert!(adapter.followers().contains("f2"));

    let outcome = adapter
        .parse_and_write(
            vec![
                json!({ "id": "f2", "username": "bob" }),
                json!({ "id": "f3", "username": "carol" }),
            ],
            &EndpointId::simple("followers"),
        )
        .await
        .unwrap();
    assert_eq!(outcome.activities.len(), 1);

    let handoff = Handoff {
        checkpoint: Checkpoint::at(
            EndpointId::simple("followers"),
            "c3",
            vec![EndpointId::simple("followers"), EndpointId::simple("mentions")],
        ),
        wait_seconds: 900,
        limit_count: 1,
    };
    adapter.on_limit_reached(&handoff).await.unwrap();

    let message = h.queue.pop("twitter:t1").await.unwrap();
    let carried: Vec<_> = message.args.followers.iter().cloned().collect();
    assert_eq!(carried, vec!["f2".to_string(), "f3".to_string()]);
    assert_eq!(message.limit_count, 1);

    // Settings are only written when the run completes
    let record = h.store.record("t1", Integration::Twitter).await;
    assert!(record.map_or(true, |r| !r.settings.followers.contains("f3")));
}

#[tokio::test]
async fn test_social_after_date_outside_onboarding() {
    let h = Harness::new();
    let steady = SocialAdapter::new(
        h.ctx(false),
        h.dyn_source(),
        "P1",
        vec![],
        IntegrationSettings::default(),
    );
    steady.get(&EndpointId::simple("mentions"), "").await.unwrap();

    let onboarding = SocialAdapter::new(
        h.ctx(true),
        h.dyn_source(),
        "P1",
        vec![],
        IntegrationSettings::default(),
    );
    onboarding.get(&EndpointId::simple("mentions"), "").await.unwrap();

    let requests = h.source.requests();
    assert_eq!(requests[0].arg, json!("P1"));
    assert!(requests[0].params.contains_key("afterDate"));
    assert!(!requests[1].params.contains_key("afterDate"));
}

#[tokio::test]
async fn test_social_posts_count_against_limit() {
    let h = Harness::new();
    let mut adapter = SocialAdapter::new(
        h.ctx(true),
        h.dyn_source(),
        "P1",
        vec!["rust".to_string()],
        IntegrationSettings::default(),
    );

    let mentions = adapter
        .parse_and_write(
            vec![post("1", "alice"), post("2", "bob")],
            &EndpointId::simple("mentions"),
        )
        .await
        .unwrap();
    assert_eq!(mentions.quota_used, 2);
    assert_eq!(mentions.activities[0].activity_type, "mention");
    assert_eq!(mentions.activities[0].attributes["body"], "hello");

    let tagged = adapter
        .parse_and_write(vec![post("3", "carol")], &EndpointId::simple("hashtag/rust"))
        .await
        .unwrap();
    assert_eq!(tagged.activities[0].activity_type, "hashtag");
    assert_eq!(tagged.activities[0].attributes["hashtag"], "rust");
    assert_eq!(adapter.post_count(), 3);

    let err = adapter
        .parse_and_write(vec![post("4", "dave")], &EndpointId::simple("likes"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Contract { .. }));
}

#[tokio::test]
async fn test_social_limits() {
    let h = Harness::new();
    let onboarding = SocialAdapter::new(
        h.ctx(true),
        h.dyn_source(),
        "P1",
        vec![],
        IntegrationSettings::default(),
    );
    assert_eq!(onboarding.global_limit(None), Some(7000));
    assert_eq!(onboarding.global_limit(Some(100)), Some(70));

    let steady = SocialAdapter::new(
        h.ctx(false),
        h.dyn_source(),
        "P1",
        vec![],
        IntegrationSettings::default(),
    );
    assert_eq!(steady.global_limit(None), Some(10_000));

    assert!(steady.is_limit_reached(&RateSignal::new(2, 60)));
    assert!(!steady.is_limit_reached(&RateSignal::new(3, 60)));
    assert!(!steady.is_limit_reached(&RateSignal::unlimited()));
}

#[tokio::test]
async fn test_social_handoff_on_low_budget() {
    let h = Harness::new();
    h.source.respond(
        "followers",
        json!("P1"),
        "",
        PageResponse::new(
            vec![json!({ "id": "f2", "username": "bob" })],
            Some("c2".to_string()),
            RateSignal::new(1, 900),
        ),
    );

    let mut adapter = SocialAdapter::new(
        h.ctx(true),
        h.dyn_source(),
        "P1",
        vec!["rust".to_string()],
        IntegrationSettings::default(),
    );
    let outcome = run(&mut adapter, true, None).await;

    let expected = Checkpoint::at(
        EndpointId::simple("followers"),
        "c2",
        vec![
            EndpointId::simple("followers"),
            EndpointId::simple("mentions"),
            EndpointId::simple("hashtag/rust"),
        ],
    );
    assert_eq!(
        outcome,
        RunOutcome::LimitReached {
            checkpoint: expected.clone(),
            wait_seconds: 900,
        }
    );

    let message = h.queue.pop("twitter:t1").await.unwrap();
    assert_eq!(message.state, expected);
    assert_eq!(message.args.profile_id.as_deref(), Some("P1"));
    assert_eq!(message.args.hashtags, vec!["rust".to_string()]);
}

#[tokio::test]
async fn test_social_marks_done_only_when_onboarding() {
    let h = Harness::new();
    let mut steady =
        SocialAdapter::new(h.ctx(false), h.dyn_source(), "P1", vec![], known_followers());
    steady.on_complete().await.unwrap();
    assert_eq!(
        h.store.status("t1", Integration::Twitter).await.unwrap(),
        Some(IntegrationStatus::InProgress)
    );

    let mut onboarding = SocialAdapter::load(h.ctx(true), h.dyn_source(), "P1", vec![])
        .await
        .unwrap();
    assert!(onboarding.followers().contains("f1"));
    onboarding.on_complete().await.unwrap();
    assert_eq!(
        h.store.status("t1", Integration::Twitter).await.unwrap(),
        Some(IntegrationStatus::Done)
    );
}

// ============================================================================
// Article Adapter Tests
// ============================================================================

fn article() -> ArticleInfo {
    ArticleInfo {
        id: 7,
        title: "Pagination".to_string(),
        url: "https://dev.to/alice/pagination".to_string(),
    }
}

#[tokio::test]
async fn test_article_flattens_comment_tree() {
    let h = Harness::new();
    h.source.respond(
        "comments",
        json!(7),
        "",
        PageResponse::last(vec![json!({
            "id_code": "a1",
            "body_html": "<p>great post</p>",
            "created_at": "2024-01-01T10:00:00Z",
            "user": {
                "user_id": 1,
                "username": "alice",
                "twitter_username": "al",
                "github_username": "",
            },
            "children": [{
                "id_code": "a2",
                "body_html": "<p>agreed</p>",
                "created_at": "2024-01-01T10:05:00Z",
                "user": { "user_id": 2, "username": "bob b" },
                "children": [],
            }],
        })]),
    );
    h.source.respond(
        "user",
        json!(1),
        "",
        PageResponse::last(vec![json!({
            "username": "alice",
            "summary": "hi",
            "location": "Berlin",
        })]),
    );

    let mut adapter = ArticleAdapter::new(h.ctx(false), h.dyn_source(), vec![article()]);
    let outcome = run(&mut adapter, false, None).await;
    assert!(outcome.is_completed());
    assert_eq!(h.source.usecases(), vec!["comments", "user", "user"]);

    let activities = h.sink.activities().await;
    assert_eq!(activities.len(), 2);

    let top = &activities[0];
    assert_eq!(top.source_id, "a1");
    assert_eq!(top.source_parent_id, None);
    assert_eq!(top.attributes["body"], "great post");
    assert_eq!(top.attributes["url"], "https://dev.to/alice/comment/a1");
    assert_eq!(top.attributes["thread"], false);
    assert_eq!(top.attributes["articleTitle"], "Pagination");
    assert_eq!(top.member.bio.as_deref(), Some("hi"));
    assert_eq!(top.member.location.as_deref(), Some("Berlin"));
    assert_eq!(top.member.identities.get("twitter").map(String::as_str), Some("al"));
    assert!(!top.member.identities.contains_key("github"));

    let child = &activities[1];
    assert_eq!(child.source_parent_id.as_deref(), Some("a1"));
    assert_eq!(child.attributes["thread"], true);
    assert_eq!(child.attributes["userUrl"], "https://dev.to/bob+b");
    assert_eq!(child.member.bio, None);

    assert_eq!(
        h.store.status("t1", Integration::Devto).await.unwrap(),
        Some(IntegrationStatus::Done)
    );
}

#[tokio::test]
async fn test_article_unknown_endpoint() {
    let h = Harness::new();
    let adapter = ArticleAdapter::new(h.ctx(false), h.dyn_source(), vec![article()]);
    let err = adapter.get(&EndpointId::simple("8"), "").await.unwrap_err();
    assert!(matches!(err, Error::Contract { .. }));
}

// ============================================================================
// Reach Adapter Tests
// ============================================================================

fn subject(id: &str, username: &str, reach: i64) -> ReachSubject {
    ReachSubject {
        id: id.to_string(),
        username: username.to_string(),
        reach,
    }
}

#[test]
fn test_batch_endpoints() {
    let mut subjects: Vec<ReachSubject> = (0..100)
        .map(|i| subject(&format!("m{i}"), &format!("User{i}"), 0))
        .collect();
    subjects.push(subject("long", "fifteen_chars__", 0));

    let batches = batch_endpoints(subjects);
    assert_eq!(batches.len(), 2);
    match batches[0].as_composite() {
        Some(CompositeEndpoint::Batch { subjects }) => {
            assert_eq!(subjects.len(), MAX_BATCH_SIZE);
            assert_eq!(subjects[0].username, "user0");
        }
        other => panic!("unexpected endpoint {other:?}"),
    }
    match batches[1].as_composite() {
        Some(CompositeEndpoint::Batch { subjects }) => {
            assert_eq!(subjects.len(), 1);
            assert_eq!(subjects[0].id, "m99");
        }
        other => panic!("unexpected endpoint {other:?}"),
    }
}

#[tokio::test]
async fn test_reach_writes_changed_counts_only() {
    let h = Harness::new();
    let subjects = vec![subject("m1", "alice", 10), subject("m2", "bob", 5)];
    h.source.respond(
        "profiles",
        json!(["alice", "bob"]),
        "",
        PageResponse::last(vec![
            json!({ "username": "Alice", "followersCount": 10 }),
            json!({ "username": "bob", "followersCount": 8 }),
        ]),
    );

    let mut adapter = ReachAdapter::from_subjects(h.ctx(false), h.dyn_source(), "P1", subjects);
    let outcome = run(&mut adapter, false, None).await;
    assert!(outcome.is_completed());

    let updates = h.sink.member_updates().await;
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].member_id, "m2");
    assert_eq!(updates[0].reach, 8);
    assert!(h.sink.activities().await.is_empty());
}

#[tokio::test]
async fn test_reach_unchanged_page_has_no_last_record() {
    let h = Harness::new();
    let batch = batch_endpoints(vec![subject("m1", "alice", 10)]).remove(0);
    let mut adapter = ReachAdapter::new(h.ctx(false), h.dyn_source(), "P1", vec![batch.clone()]);

    let outcome = adapter
        .parse_and_write(vec![json!({ "username": "alice", "followersCount": 10 })], &batch)
        .await
        .unwrap();
    assert!(outcome.last_record.is_none());
    assert_eq!(outcome.record_count, 1);
    assert_eq!(h.sink.operations().await, 0);

    assert!(adapter.is_limit_reached(&RateSignal::new(2, 10)));
    assert!(!adapter.is_limit_reached(&RateSignal::new(3, 10)));

    let err = adapter
        .get(&EndpointId::simple("followers"), "")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Contract { .. }));
}

// ============================================================================
// Repository Adapter Tests
// ============================================================================

fn repo() -> RepoInfo {
    RepoInfo {
        name: "acme/widgets".to_string(),
        url: "https://github.com/acme/widgets".to_string(),
    }
}

fn author(login: &str) -> JsonValue {
    json!({
        "login": login,
        "name": login.to_uppercase(),
        "company": "Acme",
        "twitterUsername": "tw",
    })
}

fn repo_adapter(h: &Harness) -> RepoAdapter {
    let pool = CredentialPool::with_credentials(
        vec![Credential::new("c1", "tok-1")],
        PoolConfig::default(),
    );
    let caller = PooledCaller::new(pool, "t1").with_retry(RetryPolicy::new(2, Duration::ZERO));
    RepoAdapter::new(h.ctx(false), h.dyn_source(), caller, vec![repo()])
}

#[tokio::test]
async fn test_repo_universe_and_contract_errors() {
    let h = Harness::new();
    let adapter = repo_adapter(&h);
    let universe: Vec<String> = adapter.universe().iter().map(ToString::to_string).collect();
    assert_eq!(
        universe,
        vec![
            "acme/widgets|stargazers",
            "acme/widgets|forks",
            "acme/widgets|pulls",
            "acme/widgets|issues",
            "acme/widgets|discussions",
        ]
    );

    for endpoint in ["acme/widgets|watchers", "other/repo|issues", "no-pipe"] {
        let err = adapter.get(&EndpointId::simple(endpoint), "").await.unwrap_err();
        assert!(matches!(err, Error::Contract { .. }), "{endpoint}");
    }
}

#[tokio::test]
async fn test_repo_stars_filtered_and_hashed() {
    let h = Harness::new();
    h.source.respond(
        "stargazers",
        json!("acme/widgets"),
        "",
        PageResponse::last(vec![
            json!({ "node": author("alice"), "starredAt": "2024-01-01T00:00:00Z" }),
            json!({ "node": { "login": "" }, "starredAt": "2024-01-01T00:00:00Z" }),
        ]),
    );
    let mut adapter = repo_adapter(&h);
    let endpoint = RepoEvent::Stargazers.endpoint("acme/widgets");

    let page = adapter.get(&endpoint, "").await.unwrap();
    assert_eq!(page.records.len(), 1);
    assert_eq!(
        h.source.requests()[0].credential.as_ref().map(|c| c.id.as_str()),
        Some("c1")
    );

    let outcome = adapter.parse_and_write(page.records, &endpoint).await.unwrap();
    let star = &outcome.activities[0];
    assert_eq!(
        star.source_id,
        generate_source_id_hash("alice", "star", "2024-01-01T00:00:00Z", "github").unwrap()
    );
    assert_eq!(star.attributes["repo"], "https://github.com/acme/widgets");
    assert_eq!(star.member.organisation.as_deref(), Some("Acme"));
    assert_eq!(star.member.identities.get("twitter").map(String::as_str), Some("tw"));
    assert!(!adapter.is_endpoint_finished(&endpoint, outcome.last_record.as_ref().unwrap(), &[]));
}

#[tokio::test]
async fn test_repo_items_append_comment_endpoints() {
    let h = Harness::new();
    let mut adapter = repo_adapter(&h);

    let issues = adapter
        .parse_and_write(
            vec![json!({
                "id": "I1", "number": 4, "author": author("bob"),
                "createdAt": "2024-01-02T00:00:00Z",
                "bodyText": "broken", "url": "https://github.com/acme/widgets/issues/4",
                "title": "Bug", "state": "OPEN",
            })],
            &RepoEvent::Issues.endpoint("acme/widgets"),
        )
        .await
        .unwrap();
    assert_eq!(issues.activities[0].activity_type, "issues-opened");
    assert_eq!(issues.activities[0].attributes["state"], "open");
    assert_eq!(
        issues.appended,
        vec![EndpointId::composite(CompositeEndpoint::Comments {
            repo: "acme/widgets".to_string(),
            feed: CommentFeed::IssueComments,
            number: 4,
        })]
    );

    let discussions = adapter
        .parse_and_write(
            vec![
                json!({
                    "id": "D1", "number": 1, "author": author("carol"),
                    "createdAt": "2024-01-03T00:00:00Z",
                    "title": "Idea", "category": { "name": "Ideas" },
                    "comments": { "totalCount": 2 },
                }),
                json!({
                    "id": "D2", "number": 2, "author": author("dave"),
                    "createdAt": "2024-01-04T00:00:00Z",
                    "title": "Quiet", "comments": { "totalCount": 0 },
                }),
            ],
            &RepoEvent::Discussions.endpoint("acme/widgets"),
        )
        .await
        .unwrap();
    assert_eq!(discussions.activities.len(), 2);
    assert_eq!(discussions.activities[0].attributes["category"], json!({ "name": "Ideas" }));
    assert_eq!(discussions.appended.len(), 1);
}

#[tokio::test]
async fn test_repo_discussion_comments_and_replies() {
    let h = Harness::new();
    let mut adapter = repo_adapter(&h);
    let endpoint = EndpointId::composite(CompositeEndpoint::Comments {
        repo: "acme/widgets".to_string(),
        feed: CommentFeed::DiscussionComments,
        number: 1,
    });

    let outcome = adapter
        .parse_and_write(
            vec![json!({
                "id": "DC1", "author": author("erin"), "createdAt": "2024-01-05T00:00:00Z",
                "bodyText": "answer", "isAnswer": true, "discussion": { "id": "D1" },
                "replies": { "nodes": [{
                    "id": "DC2", "author": author("frank"), "createdAt": "2024-01-05T01:00:00Z",
                    "bodyText": "thanks",
                }] },
            })],
            &endpoint,
        )
        .await
        .unwrap();

    let answer = &outcome.activities[0];
    assert_eq!(answer.source_parent_id.as_deref(), Some("D1"));
    assert_eq!(answer.score, 10);
    let reply = &outcome.activities[1];
    assert_eq!(reply.source_parent_id.as_deref(), Some("DC1"));
    assert_eq!(reply.score, 6);
    assert_eq!(outcome.last_record.unwrap().source_id, "DC2");
}

#[tokio::test]
async fn test_repo_run_walks_appended_comments_last() {
    let h = Harness::new();
    let repo_arg = json!("acme/widgets");
    h.source.respond(
        "pulls",
        repo_arg.clone(),
        "",
        PageResponse::last(vec![json!({
            "id": "PR1", "number": 9, "author": author("gina"), "createdAt": "2024-01-06T00:00:00Z",
            "title": "Fix", "state": "MERGED",
        })]),
    );
    h.source.respond(
        "pull-comments",
        json!({ "repo": "acme/widgets", "number": 9 }),
        "",
        PageResponse::last(vec![json!({
            "id": "PC1", "author": author("hank"), "createdAt": "2024-01-06T02:00:00Z",
            "bodyText": "lgtm", "pullRequest": { "id": "PR1" },
        })]),
    );

    let mut adapter = repo_adapter(&h);
    let outcome = run(&mut adapter, false, None).await;
    assert!(outcome.is_completed());
    assert_eq!(
        h.source.usecases(),
        vec!["stargazers", "forks", "pulls", "issues", "discussions", "pull-comments"]
    );

    let activities = h.sink.activities().await;
    assert_eq!(activities[0].activity_type, "pull_request-opened");
    assert_eq!(activities[1].activity_type, "pull_request-comment");
    assert_eq!(activities[1].source_parent_id.as_deref(), Some("PR1"));
    assert_eq!(
        h.store.status("t1", Integration::Github).await.unwrap(),
        Some(IntegrationStatus::Done)
    );
}
