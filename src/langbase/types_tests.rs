//! Unit tests for Langbase request and response types.

use super::*;

#[test]
fn test_message_constructors() {
    assert_eq!(Message::system("s").role, MessageRole::System);
    assert_eq!(Message::user("u").role, MessageRole::User);
    assert_eq!(Message::assistant("a").role, MessageRole::Assistant);
    assert_eq!(Message::user("hello").content, "hello");
}

#[test]
fn test_message_role_serializes_lowercase() {
    let json = serde_json::to_value(Message::system("x")).unwrap();
    assert_eq!(json["role"], "system");
    assert_eq!(json["content"], "x");
}

#[test]
fn test_pipe_request_defaults() {
    let req = PipeRequest::new("got-evidence-v1", vec![Message::user("q")]);
    assert_eq!(req.name, "got-evidence-v1");
    assert!(!req.stream);
    assert!(req.variables.is_none());

    let json = serde_json::to_value(&req).unwrap();
    assert_eq!(json["stream"], false);
    assert!(json.get("variables").is_none());
}

#[test]
fn test_pipe_request_variables() {
    let req = PipeRequest::new("p", Vec::new())
        .with_variable("hypothesis", "h")
        .with_variable("query", "q");
    let vars = req.variables.unwrap();
    assert_eq!(vars.len(), 2);
    assert_eq!(vars.get("hypothesis").map(String::as_str), Some("h"));
}

#[test]
fn test_pipe_response_minimal() {
    let resp: PipeResponse = serde_json::from_str(r#"{"completion": "hi"}"#).unwrap();
    assert!(!resp.success);
    assert_eq!(resp.completion, "hi");
    assert!(resp.thread_id.is_none());
    assert!(resp.total_tokens().is_none());
}

#[test]
fn test_pipe_response_full() {
    let resp: PipeResponse = serde_json::from_str(
        r#"{
            "success": true,
            "completion": "{}",
            "threadId": "t-1",
            "raw": {"model": "gpt-4o-mini", "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}}
        }"#,
    )
    .unwrap();
    assert!(resp.success);
    assert_eq!(resp.thread_id.as_deref(), Some("t-1"));
    assert_eq!(resp.total_tokens(), Some(15));
}

#[test]
fn test_strip_code_fences() {
    assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
    assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
    assert_eq!(strip_code_fences("```\n{\"a\":1}\n```  "), "{\"a\":1}");
    assert_eq!(strip_code_fences("  plain text \n"), "plain text");
}

#[test]
fn test_completion_body_uses_fence_stripping() {
    let resp: PipeResponse =
        serde_json::from_str(r#"{"completion": "```json\n{\"evidence\": []}\n```"}"#).unwrap();
    assert_eq!(resp.completion_body(), r#"{"evidence": []}"#);
}
