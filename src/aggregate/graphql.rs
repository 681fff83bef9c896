//! Best-effort GraphQL operation detection from request bodies and query
//! strings. Any parse failure degrades to "no GraphQL attributes".

use super::records::GraphQlInfo;

/// Tries the request body first (JSON envelope with a `query` document),
/// then the URL query string (`query=` / `operationName=` parameters).
pub fn parse_graphql(body: Option<&str>, query_string: &str) -> Option<GraphQlInfo> {
    body.and_then(parse_body)
        .or_else(|| parse_query_string(query_string))
}

fn parse_body(body: &str) -> Option<GraphQlInfo> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let document = json.get("query")?.as_str()?;
    let operation_type = operation_type(document)?;
    let operation_name = json
        .get("operationName")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| name_from_document(document))
        .unwrap_or_else(|| "Anonymous".to_string());
    Some(GraphQlInfo {
        operation_name,
        operation_type,
    })
}

fn parse_query_string(query_string: &str) -> Option<GraphQlInfo> {
    let mut document = None;
    let mut name = None;
    for pair in query_string.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key {
            "query" => document = Some(value),
            "operationName" => name = Some(value),
            _ => {}
        }
    }
    let document = decode_component(document?);
    let operation_type = operation_type(&document)?;
    let operation_name = name
        .map(str::to_string)
        .or_else(|| name_from_document(&document))
        .unwrap_or_else(|| "Anonymous".to_string());
    Some(GraphQlInfo {
        operation_name,
        operation_type,
    })
}

// Just enough decoding for the characters a GraphQL document needs.
fn decode_component(raw: &str) -> String {
    raw.replace('+', " ")
        .replace("%20", " ")
        .replace("%7B", "{")
        .replace("%7D", "}")
        .replace("%0A", " ")
}

fn operation_type(document: &str) -> Option<String> {
    let trimmed = document.trim_start();
    if trimmed.starts_with('{') {
        return Some("query".to_string());
    }
    let keyword = trimmed
        .split(|c: char| c.is_whitespace() || c == '{' || c == '(')
        .next()?;
    matches!(keyword, "query" | "mutation" | "subscription").then(|| keyword.to_string())
}

fn name_from_document(document: &str) -> Option<String> {
    let trimmed = document.trim_start();
    let mut tokens = trimmed.split(|c: char| c.is_whitespace() || c == '{' || c == '(');
    let keyword = tokens.next()?;
    if !matches!(keyword, "query" | "mutation" | "subscription") {
        return None;
    }
    let name = tokens.find(|t| !t.is_empty())?;
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_with_operation_name() {
        let body = r#"{"operationName":"GetCart","query":"query GetCart { cart { id } }"}"#;
        let info = parse_graphql(Some(body), "").unwrap();
        assert_eq!(info.operation_name, "GetCart");
        assert_eq!(info.operation_type, "query");
    }

    #[test]
    fn name_recovered_from_document() {
        let body = r#"{"query":"mutation AddItem($id: ID!) { add(id: $id) }"}"#;
        let info = parse_graphql(Some(body), "").unwrap();
        assert_eq!(info.operation_name, "AddItem");
        assert_eq!(info.operation_type, "mutation");
    }

    #[test]
    fn shorthand_document_is_an_anonymous_query() {
        let info = parse_graphql(Some(r#"{"query":"{ cart { id } }"}"#), "").unwrap();
        assert_eq!(info.operation_name, "Anonymous");
        assert_eq!(info.operation_type, "query");
    }

    #[test]
    fn query_string_fallback() {
        let info = parse_graphql(None, "query=query%20Ping%20{ok}&operationName=Ping").unwrap();
        assert_eq!(info.operation_name, "Ping");
        assert_eq!(info.operation_type, "query");
    }

    #[test]
    fn malformed_body_degrades_to_none() {
        assert!(parse_graphql(Some("{not json"), "").is_none());
        assert!(parse_graphql(Some(r#"{"query":42}"#), "").is_none());
        assert!(parse_graphql(None, "page=2").is_none());
    }
}
