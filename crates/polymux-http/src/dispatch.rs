//! The inbound tool surface (spec §6.1), implemented as a `ToolDispatch`
//! trait with one method per named operation — directly analogous to the
//! teacher's `execute_command` passthrough in `client.rs`, generalized here
//! from one method to the full named operation set. Every operation takes a
//! `serde_json::Value` argument map and returns a `serde_json::Value` result
//! or a `GatewayError`, so `polymux-http`'s transport layer never needs to
//! know the per-operation Rust types.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use polymux_manager::LspManager;
use polymux_symbols::{LookupOptions, Scope};
use polymux_types::{GatewayError, GatewayResult, ReferenceContextMode, SymbolKind};

/// Everything a dispatched tool call needs: the manager for the project
/// this request targets, and the project root every relative path in an
/// argument map is resolved against.
pub struct GatewayContext {
    pub manager: Arc<LspManager>,
    pub root: PathBuf,
}

/// The inbound tool surface (spec §6.1): one method per named operation,
/// each taking a `serde_json::Value` argument map and returning a
/// `serde_json::Value` result, directly analogous to the teacher's
/// `execute_command` passthrough in `client.rs` generalized from one
/// method to the full named operation set.
#[async_trait]
pub trait ToolDispatch {
    async fn call(&self, tool_name: &str, args: &Value) -> GatewayResult<Value>;
}

#[async_trait]
impl ToolDispatch for GatewayContext {
    /// Routes `tool_name` to its operation. Unknown tool names fail
    /// `InvalidArgument` rather than panicking — the agent layer that
    /// calls this is an external collaborator spec §1 places out of scope,
    /// so a malformed call must degrade to a structured error, never a
    /// crash.
    async fn call(&self, tool_name: &str, args: &Value) -> GatewayResult<Value> {
        match tool_name {
            "get_symbols_overview" => get_symbols_overview(self, args).await,
            "find_symbol" => find_symbol(self, args).await,
            "find_referencing_symbols" => find_referencing_symbols(self, args).await,
            "replace_symbol_body" => replace_symbol_body(self, args).await,
            "insert_before_symbol" => insert_before_symbol(self, args).await,
            "insert_after_symbol" => insert_after_symbol(self, args).await,
            "rename_symbol" => rename_symbol(self, args).await,
            "search_for_pattern" => search_for_pattern(self, args).await,
            "get_call_hierarchy_incoming" => get_call_hierarchy(self, args, true).await,
            "get_call_hierarchy_outgoing" => get_call_hierarchy(self, args, false).await,
            other => Err(GatewayError::InvalidArgument(format!("unknown tool: {other}"))),
        }
    }
}

async fn get_symbols_overview(ctx: &GatewayContext, args: &Value) -> GatewayResult<Value> {
    let relative_path = required_str(args, "relative_path")?;
    let depth = optional_u64(args, "depth").unwrap_or(1) as u32;
    let include_body = optional_bool(args, "include_body").unwrap_or(false);
    let trees = polymux_symbols::symbols_overview(&ctx.manager, &ctx.root, relative_path, depth, include_body).await?;
    Ok(json!(trees))
}

async fn find_symbol(ctx: &GatewayContext, args: &Value) -> GatewayResult<Value> {
    let name_path = required_str(args, "name_path")?;
    let scope = match optional_str(args, "relative_path") {
        Some(relative) => {
            let abs = ctx.root.join(relative);
            if abs.is_dir() {
                Scope::Directory(abs)
            } else {
                Scope::File(abs)
            }
        }
        None => Scope::Project,
    };
    let options = LookupOptions {
        include_body: optional_bool(args, "include_body").unwrap_or(false),
        include_kinds: optional_kind_list(args, "include_kinds")?,
        exclude_kinds: optional_kind_list(args, "exclude_kinds")?,
        substring_matching: optional_bool(args, "substring_matching").unwrap_or(false),
    };
    let symbols = polymux_symbols::find_symbol(&ctx.manager, &ctx.root, name_path, scope, &options).await?;
    Ok(json!(symbols))
}

async fn find_referencing_symbols(ctx: &GatewayContext, args: &Value) -> GatewayResult<Value> {
    let name_path = required_str(args, "name_path")?;
    let relative_path = required_str(args, "relative_path")?;
    let context_mode = match optional_str(args, "context_mode") {
        Some("line_only") => ReferenceContextMode::LineOnly,
        Some("full") => ReferenceContextMode::Full,
        Some("none") | None => ReferenceContextMode::None,
        Some(other) => return Err(GatewayError::InvalidArgument(format!("unknown context_mode: {other}"))),
    };
    let refs = polymux_symbols::find_referencing_symbols(&ctx.manager, &ctx.root, name_path, relative_path, context_mode).await?;
    Ok(json!(refs))
}

async fn replace_symbol_body(ctx: &GatewayContext, args: &Value) -> GatewayResult<Value> {
    let name_path = required_str(args, "name_path")?;
    let relative_path = required_str(args, "relative_path")?;
    let body = required_str(args, "body")?;
    let expected_body = optional_str(args, "expected_body");
    polymux_symbols::replace_symbol_body(&ctx.manager, &ctx.root, name_path, relative_path, body, expected_body).await?;
    Ok(json!({"ok": true}))
}

async fn insert_before_symbol(ctx: &GatewayContext, args: &Value) -> GatewayResult<Value> {
    let name_path = required_str(args, "name_path")?;
    let relative_path = required_str(args, "relative_path")?;
    let body = required_str(args, "body")?;
    polymux_symbols::insert_before_symbol(&ctx.manager, &ctx.root, name_path, relative_path, body).await?;
    Ok(json!({"ok": true}))
}

async fn insert_after_symbol(ctx: &GatewayContext, args: &Value) -> GatewayResult<Value> {
    let name_path = required_str(args, "name_path")?;
    let relative_path = required_str(args, "relative_path")?;
    let body = required_str(args, "body")?;
    polymux_symbols::insert_after_symbol(&ctx.manager, &ctx.root, name_path, relative_path, body).await?;
    Ok(json!({"ok": true}))
}

async fn rename_symbol(ctx: &GatewayContext, args: &Value) -> GatewayResult<Value> {
    let name_path = required_str(args, "name_path")?;
    let relative_path = required_str(args, "relative_path")?;
    let new_name = required_str(args, "new_name")?;
    let touched = polymux_symbols::rename_symbol(&ctx.manager, &ctx.root, name_path, relative_path, new_name).await?;
    Ok(json!({"touched_files": touched}))
}

async fn search_for_pattern(ctx: &GatewayContext, args: &Value) -> GatewayResult<Value> {
    let pattern = required_str(args, "pattern")?;
    let options = polymux_symbols::PatternSearchOptions {
        paths_include_glob: optional_str(args, "paths_include_glob").map(str::to_string),
        paths_exclude_glob: optional_str(args, "paths_exclude_glob").map(str::to_string),
        context_lines_before: optional_u64(args, "context_lines_before").unwrap_or(0) as u32,
        context_lines_after: optional_u64(args, "context_lines_after").unwrap_or(0) as u32,
    };
    let matches = polymux_symbols::search_for_pattern(&ctx.root, pattern, &options)?;
    Ok(json!(matches))
}

async fn get_call_hierarchy(ctx: &GatewayContext, args: &Value, incoming: bool) -> GatewayResult<Value> {
    let name_path = required_str(args, "name_path")?;
    let relative_path = required_str(args, "relative_path")?;
    let max_depth = optional_u64(args, "max_depth").unwrap_or(3) as u32;
    let nodes = if incoming {
        polymux_symbols::incoming_calls(&ctx.manager, &ctx.root, name_path, relative_path, max_depth).await?
    } else {
        polymux_symbols::outgoing_calls(&ctx.manager, &ctx.root, name_path, relative_path, max_depth).await?
    };
    Ok(json!(nodes))
}

fn required_str<'a>(args: &'a Value, key: &str) -> GatewayResult<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| GatewayError::InvalidArgument(format!("missing required string argument: {key}")))
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

fn optional_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

fn optional_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

fn optional_kind_list(args: &Value, key: &str) -> GatewayResult<Option<Vec<SymbolKind>>> {
    let Some(value) = args.get(key) else { return Ok(None) };
    let Some(items) = value.as_array() else {
        return Err(GatewayError::InvalidArgument(format!("{key} must be an array of symbol kind names")));
    };
    let mut kinds = Vec::with_capacity(items.len());
    for item in items {
        let name = item
            .as_str()
            .ok_or_else(|| GatewayError::InvalidArgument(format!("{key} entries must be strings")))?;
        kinds.push(parse_symbol_kind(name)?);
    }
    Ok(Some(kinds))
}

fn parse_symbol_kind(name: &str) -> GatewayResult<SymbolKind> {
    Ok(match name {
        "file" => SymbolKind::File,
        "module" => SymbolKind::Module,
        "namespace" => SymbolKind::Namespace,
        "package" => SymbolKind::Package,
        "class" => SymbolKind::Class,
        "method" => SymbolKind::Method,
        "property" => SymbolKind::Property,
        "field" => SymbolKind::Field,
        "constructor" => SymbolKind::Constructor,
        "enum" => SymbolKind::Enum,
        "interface" => SymbolKind::Interface,
        "function" => SymbolKind::Function,
        "variable" => SymbolKind::Variable,
        "constant" => SymbolKind::Constant,
        "string" => SymbolKind::String,
        "number" => SymbolKind::Number,
        "boolean" => SymbolKind::Boolean,
        "array" => SymbolKind::Array,
        "object" => SymbolKind::Object,
        "key" => SymbolKind::Key,
        "null" => SymbolKind::Null,
        "enum_member" => SymbolKind::EnumMember,
        "struct" => SymbolKind::Struct,
        "event" => SymbolKind::Event,
        "operator" => SymbolKind::Operator,
        "type_parameter" => SymbolKind::TypeParameter,
        other => return Err(GatewayError::InvalidArgument(format!("unknown symbol kind: {other}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_str_rejects_a_missing_argument() {
        let args = json!({});
        assert!(matches!(required_str(&args, "name_path"), Err(GatewayError::InvalidArgument(_))));
    }

    #[test]
    fn kind_list_rejects_an_unknown_name() {
        let args = json!({"include_kinds": ["class", "not_a_kind"]});
        assert!(matches!(optional_kind_list(&args, "include_kinds"), Err(GatewayError::InvalidArgument(_))));
    }

    #[test]
    fn kind_list_parses_known_names() {
        let args = json!({"include_kinds": ["class", "method"]});
        let kinds = optional_kind_list(&args, "include_kinds").unwrap().unwrap();
        assert_eq!(kinds, vec![SymbolKind::Class, SymbolKind::Method]);
    }
}
