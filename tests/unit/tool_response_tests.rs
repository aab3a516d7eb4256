use dispatcher::models::tool_request::ToolResponse;

#[test]
fn ok_response_omits_the_error_and_is_error_fields() {
    let response = ToolResponse::ok(serde_json::json!({ "task_id": "abc" }));
    let value = serde_json::to_value(&response).expect("serialize");

    assert!(value.get("isError").is_none());
    assert_eq!(value["data"]["task_id"], serde_json::json!("abc"));
    assert!(value.get("error").is_none());
}

#[test]
fn err_response_sets_is_error_true_and_omits_data() {
    let response = ToolResponse::err("invalid schedule kind: xyz");
    let value = serde_json::to_value(&response).expect("serialize");

    assert_eq!(value["isError"], serde_json::json!(true));
    assert_eq!(value["error"], serde_json::json!("invalid schedule kind: xyz"));
    assert!(value.get("data").is_none());
}
