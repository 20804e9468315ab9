// BitbucketClient against a mock Bitbucket server

use chrono::Utc;
use prbridge_bitbucket::{BitbucketClient, BitbucketConfig};
use prbridge_core::{ActivityAction, PullRequestSource, Repo, SourceError};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const API: &str = "/rest/api/1.0";

fn client(server: &MockServer) -> BitbucketClient {
    let mut config = BitbucketConfig::new(format!("{}{API}", server.uri()), "secret", "TEAM");
    config.page_limit = 2;
    BitbucketClient::new(config).unwrap()
}

fn team_app() -> Repo {
    Repo {
        id: 1,
        project: "TEAM".to_string(),
        name: "app".to_string(),
        created_at: Utc::now(),
    }
}

fn pr_json(id: i64) -> serde_json::Value {
    json!({
        "id": id,
        "title": format!("PR {id}"),
        "state": "OPEN",
        "createdDate": 1_700_000_000_000_i64 + id,
        "author": {"user": {"emailAddress": "alice@example.com", "displayName": "Alice"}},
        "reviewers": [],
        "links": {"self": [{"href": format!("https://bb/projects/TEAM/repos/app/pull-requests/{id}")}]}
    })
}

#[tokio::test]
async fn test_ping_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/application-properties")))
        .and(header("authorization", "Bearer secret"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "8.9.0"})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).ping().await.unwrap();
}

#[tokio::test]
async fn test_ping_fails_on_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/application-properties")))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client(&server).ping().await.unwrap_err();
    assert!(matches!(err, SourceError::Status { status: 401, .. }));
}

#[tokio::test]
async fn test_list_pull_requests_follows_pages() {
    let server = MockServer::start().await;
    let endpoint = format!("{API}/projects/TEAM/repos/app/pull-requests");

    Mock::given(method("GET"))
        .and(path(endpoint.clone()))
        .and(query_param("state", "OPEN"))
        .and(query_param("start", "0"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "start": 0, "size": 2, "limit": 2,
            "isLastPage": false, "nextPageStart": 2,
            "values": [pr_json(1), pr_json(2)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(endpoint))
        .and(query_param("state", "OPEN"))
        .and(query_param("start", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "start": 2, "size": 1, "limit": 2,
            "isLastPage": true,
            "values": [pr_json(3)]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let prs = client(&server)
        .list_open_pull_requests(&team_app())
        .await
        .unwrap();

    let ids: Vec<_> = prs.iter().map(|pr| pr.id).collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(
        prs[2].url,
        "https://bb/projects/TEAM/repos/app/pull-requests/3"
    );
}

#[tokio::test]
async fn test_pull_request_without_self_link_is_dropped() {
    let server = MockServer::start().await;
    let mut no_link = pr_json(2);
    no_link["links"] = json!({});

    Mock::given(method("GET"))
        .and(path(format!("{API}/projects/TEAM/repos/app/pull-requests")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isLastPage": true,
            "values": [pr_json(1), no_link]
        })))
        .mount(&server)
        .await;

    let prs = client(&server)
        .list_open_pull_requests(&team_app())
        .await
        .unwrap();
    assert_eq!(prs.len(), 1);
    assert_eq!(prs[0].id, 1);
}

#[tokio::test]
async fn test_list_pr_activity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!(
            "{API}/projects/TEAM/repos/app/pull-requests/7/activities"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isLastPage": true,
            "values": [
                {
                    "id": 11,
                    "createdDate": 1_700_000_100_000_i64,
                    "user": {"emailAddress": "bob@example.com", "displayName": "Bob"},
                    "action": "APPROVED"
                },
                {
                    "id": 12,
                    "createdDate": 1_700_000_200_000_i64,
                    "user": {"emailAddress": "bob@example.com", "displayName": "Bob"},
                    "action": "RESCOPED"
                }
            ]
        })))
        .mount(&server)
        .await;

    let activities = client(&server)
        .list_pr_activity(&team_app(), 7)
        .await
        .unwrap();

    assert_eq!(activities.len(), 2);
    assert_eq!(activities[0].action, ActivityAction::Approved);
    assert_eq!(
        activities[1].action,
        ActivityAction::Unmapped("RESCOPED".to_string())
    );
    assert_eq!(activities[0].actor.display_name, "Bob");
}

#[tokio::test]
async fn test_list_repos_uses_configured_project() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/projects/TEAM/repos")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "isLastPage": true,
            "values": [
                {"slug": "app", "project": {"key": "TEAM"}},
                {"slug": "api", "project": {"key": "TEAM"}}
            ]
        })))
        .mount(&server)
        .await;

    let repos = client(&server).list_repos().await.unwrap();
    let slugs: Vec<_> = repos.iter().map(|r| r.slug.as_str()).collect();
    assert_eq!(slugs, vec!["app", "api"]);
    assert!(repos.iter().all(|r| r.project == "TEAM"));
}

#[tokio::test]
async fn test_server_error_and_bad_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("{API}/projects/TEAM/repos")))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!(
            "{API}/projects/TEAM/repos/app/pull-requests/7/activities"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(matches!(
        client.list_repos().await,
        Err(SourceError::Status { status: 503, .. })
    ));
    assert!(matches!(
        client.list_pr_activity(&team_app(), 7).await,
        Err(SourceError::Decode { .. })
    ));
}
