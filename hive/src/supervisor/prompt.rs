//! Supervisor system-prompt assembly: static template plus the user's
//! context block, formatted at compose time.

/// Context injected into the supervisor prompt for one user.
#[derive(Clone, Debug, Default)]
pub struct UserContext {
    pub display_name: Option<String>,
    /// Servers the user has registered for infrastructure tasks.
    pub servers: Vec<String>,
    /// Connected integrations (connector types with stored credentials).
    pub integrations: Vec<String>,
    pub custom_instructions: Option<String>,
}

const SUPERVISOR_TEMPLATE: &str = "\
You are a supervisor agent coordinating work for one user. You delegate \
substantial work to disposable worker agents instead of doing it inline.

How to work:
- Use spawn_worker for anything that needs tools, takes time, or produces \
verbose output. Workers run in the background; their job id comes back \
immediately.
- Use list_workers, read_worker_result, read_worker_file, grep_workers, and \
get_worker_metadata to collect and inspect finished work.
- Keep answers short and concrete. Summarise worker findings instead of \
pasting raw logs.
- When a request is ambiguous, state your assumption and proceed.";

/// Builds the supervisor system prompt for a user.
pub fn compose_supervisor_prompt(ctx: &UserContext) -> String {
    let mut prompt = String::from(SUPERVISOR_TEMPLATE);
    prompt.push_str("\n\nUser context:\n");
    match &ctx.display_name {
        Some(name) => prompt.push_str(&format!("- Name: {name}\n")),
        None => prompt.push_str("- Name: (not set)\n"),
    }
    if ctx.servers.is_empty() {
        prompt.push_str("- Servers: none registered\n");
    } else {
        prompt.push_str(&format!("- Servers: {}\n", ctx.servers.join(", ")));
    }
    if ctx.integrations.is_empty() {
        prompt.push_str("- Integrations: none connected\n");
    } else {
        prompt.push_str(&format!("- Integrations: {}\n", ctx.integrations.join(", ")));
    }
    if let Some(instructions) = &ctx.custom_instructions {
        if !instructions.trim().is_empty() {
            prompt.push_str(&format!("\nUser instructions:\n{}\n", instructions.trim()));
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_includes_user_context() {
        let prompt = compose_supervisor_prompt(&UserContext {
            display_name: Some("Dana".into()),
            servers: vec!["cube".into(), "atlas".into()],
            integrations: vec!["slack".into()],
            custom_instructions: Some("Prefer metric units.".into()),
        });
        assert!(prompt.contains("Name: Dana"));
        assert!(prompt.contains("cube, atlas"));
        assert!(prompt.contains("Integrations: slack"));
        assert!(prompt.contains("Prefer metric units."));
        assert!(prompt.contains("spawn_worker"));
    }

    #[test]
    fn empty_context_still_produces_complete_prompt() {
        let prompt = compose_supervisor_prompt(&UserContext::default());
        assert!(prompt.contains("Servers: none registered"));
        assert!(prompt.contains("Integrations: none connected"));
        assert!(!prompt.contains("User instructions"));
    }
}
