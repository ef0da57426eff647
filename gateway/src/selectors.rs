use pm_mutate::Selector;

/// `{model, stream_options, max_tokens, max_completion_tokens, n, stream}`,
/// the skip list for chat/completions request bodies (§4.4).
pub fn chat_request_skip() -> Selector {
    Selector::parse_all(["model", "stream_options", "max_tokens", "max_completion_tokens", "n", "stream"])
        .expect("static paths parse")
}

/// `{id, usage}`, the skip list shared by chat/completions and embeddings
/// response bodies (§4.4).
pub fn id_usage_skip() -> Selector {
    Selector::parse_all(["id", "usage"]).expect("static paths parse")
}

/// `{model}`, the skip list for embeddings request bodies and the
/// transcription multipart form (§4.4).
pub fn model_skip() -> Vec<String> {
    vec!["model".to_string()]
}

pub fn model_only_selector() -> Selector {
    Selector::parse_all(["model"]).expect("static paths parse")
}

/// No skipped paths: every scalar value is mutated. Used for the
/// `/unstructured/…` response body, which carries no fields worth leaving
/// in the clear (§4.4).
pub fn empty_skip() -> Selector {
    Selector::new(Vec::new())
}
