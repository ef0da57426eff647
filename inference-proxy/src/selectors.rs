use pm_mutate::Selector;

/// `{model, stream_options, max_tokens, max_completion_tokens, n, stream}`,
/// the skip list for chat/completions request bodies on the version-gated
/// full-JSON branches (§4.4, §4.5).
pub fn chat_request_skip() -> Selector {
    Selector::parse_all(["model", "stream_options", "max_tokens", "max_completion_tokens", "n", "stream"])
        .expect("static paths parse")
}

/// `{id, usage}`, the skip list shared by chat/completions and embeddings
/// response bodies (§4.4).
pub fn id_usage_skip() -> Selector {
    Selector::parse_all(["id", "usage"]).expect("static paths parse")
}

pub fn model_only_selector() -> Selector {
    Selector::parse_all(["model"]).expect("static paths parse")
}

pub fn model_skip() -> Vec<String> {
    vec!["model".to_string()]
}

/// `{messages, tools}`, the version-absent compatibility branch's request
/// selector: whole top-level subtrees are swapped for one ciphertext blob
/// each, rather than mutating individual string leaves (§4.5, §9).
pub fn legacy_chat_request_selector() -> Selector {
    Selector::parse_all(["messages", "tools"]).expect("static paths parse")
}

/// `{choices}`, the version-absent compatibility branch's response selector.
pub fn legacy_chat_response_selector() -> Selector {
    Selector::parse_all(["choices"]).expect("static paths parse")
}

/// No skipped paths: every scalar value is mutated. Used for the
/// unstructured adapter's full-JSON response encrypt (§4.5).
pub fn empty_skip() -> Selector {
    Selector::new(Vec::new())
}
