use anyhow::Result;
use colored::Colorize;
use provision::SystemRunner;
use std::sync::Arc;

use super::effective_config;
use crate::Context;
use crate::auth::{GcloudTokens, TokenSource};
use crate::config::GkforgeConfig;
use crate::ui;

struct Issue {
    category: &'static str,
    summary: String,
    detail: Option<String>,
    fix: Option<String>,
    fix_cmd: Option<String>,
}

pub fn run(ctx: &Context) -> Result<()> {
    ui::header("gkforge Health Check");

    let mut issues: Vec<Issue> = Vec::new();

    // Check 1: Required tools
    ui::section("Required Tools");
    check_tools(&mut issues, |tool| which::which(tool).is_ok());

    // Check 2: Configuration
    ui::section("Configuration");
    let config = check_config(ctx, &mut issues);

    // Check 3: Credentials
    if let Some(config) = config {
        ui::section("Credentials");
        let tokens = GcloudTokens::new(Arc::new(SystemRunner));
        check_credentials(&mut issues, &config, &tokens);
    }

    // Summary
    println!();
    if issues.is_empty() {
        ui::success("Ready to provision");
    } else {
        print_issue_summary(&issues);
    }

    Ok(())
}

fn print_issue_summary(issues: &[Issue]) {
    let label = if issues.len() == 1 { "Issue" } else { "Issues" };
    ui::header(&format!("{} {label} Found", issues.len()));

    for (i, issue) in issues.iter().enumerate() {
        let num = i + 1;
        println!(
            "  {}  {} {}",
            format!("{num}.").bold(),
            issue.summary,
            format!("[{}]", issue.category).dimmed()
        );
        if let Some(detail) = &issue.detail {
            for line in detail.lines() {
                println!("      {}", line.dimmed());
            }
        }
        if let Some(fix) = &issue.fix {
            println!("      {} {}", "Fix:".cyan(), fix);
        }
        if let Some(cmd) = &issue.fix_cmd {
            println!("      {} {}", "$".dimmed(), cmd.bold());
        }
        println!();
    }
}

fn check_tools(issues: &mut Vec<Issue>, found: impl Fn(&str) -> bool) {
    let tools = [
        (
            "gcloud",
            "Google Cloud CLI",
            "Install the Google Cloud SDK: https://cloud.google.com/sdk/docs/install",
            None,
        ),
        (
            "kubectl",
            "Kubernetes CLI",
            "Install kubectl through gcloud",
            Some("gcloud components install kubectl"),
        ),
        (
            "helm",
            "Kubernetes package manager",
            "Install helm: https://helm.sh/docs/intro/install/",
            None,
        ),
    ];

    for (tool, desc, fix, fix_cmd) in tools {
        if found(tool) {
            println!("  {} {} - {}", "✓".green(), tool, desc.dimmed());
        } else {
            println!("  {} {} - {} {}", "✗".red(), tool, desc, "(missing)".red());
            issues.push(Issue {
                category: "Required Tools",
                summary: format!("{tool} is not on PATH"),
                detail: None,
                fix: Some(fix.to_string()),
                fix_cmd: fix_cmd.map(str::to_string),
            });
        }
    }
}

fn check_config(ctx: &Context, issues: &mut Vec<Issue>) -> Option<GkforgeConfig> {
    let (config, path) = match effective_config(ctx) {
        Ok(loaded) => loaded,
        Err(e) => {
            println!("  {} {}", "✗".red(), "Could not load configuration".red());
            issues.push(Issue {
                category: "Configuration",
                summary: "Configuration could not be loaded".into(),
                detail: Some(format!("{e:#}")),
                fix: Some("Fix the file, or regenerate it".into()),
                fix_cmd: Some("gkforge config init --force".into()),
            });
            return None;
        }
    };

    let source = if path.exists() {
        path.display().to_string()
    } else {
        format!("{} (not found, using defaults)", path.display())
    };
    println!("  {} {}", "✓".green(), source);

    if let Err(e) = config.validate() {
        println!("  {} {}", "✗".red(), format!("{e:#}").red());
        issues.push(Issue {
            category: "Configuration",
            summary: "Configuration is invalid".into(),
            detail: Some(format!("{e:#}")),
            fix: Some(format!("Edit {}", path.display())),
            fix_cmd: None,
        });
        return None;
    }

    match config.project() {
        Ok(project) => {
            println!("  {} project {}", "✓".green(), project.bold());
            Some(config)
        }
        Err(e) => {
            println!("  {} {}", "✗".red(), "No project".red());
            issues.push(Issue {
                category: "Configuration",
                summary: "No project configured".into(),
                detail: Some(e.to_string()),
                fix: Some("Set the project for this shell".into()),
                fix_cmd: Some("export GKFORGE_PROJECT=<project-id>".into()),
            });
            None
        }
    }
}

fn check_credentials(issues: &mut Vec<Issue>, config: &GkforgeConfig, tokens: &dyn TokenSource) {
    let Ok(project) = config.project() else {
        return;
    };
    let identity = config.auth.identity();
    let who = identity
        .impersonate
        .as_deref()
        .or(identity.account.as_deref())
        .unwrap_or("active gcloud account")
        .to_string();
    let ctx = provision::Context::new(project).with_identity(identity);

    match tokens.token(&ctx) {
        Ok(_) => println!("  {} access token for {}", "✓".green(), who),
        Err(e) => {
            println!("  {} access token for {} {}", "✗".red(), who, "(failed)".red());
            issues.push(Issue {
                category: "Credentials",
                summary: format!("Could not obtain an access token for {who}"),
                detail: Some(e.to_string()),
                fix: Some("Log in to gcloud".into()),
                fix_cmd: Some("gcloud auth login".into()),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingTokens;

    impl TokenSource for FailingTokens {
        fn token(&self, _ctx: &provision::Context) -> provision::Result<String> {
            Err(provision::Error::Other("not logged in".into()))
        }
    }

    struct GoodTokens;

    impl TokenSource for GoodTokens {
        fn token(&self, _ctx: &provision::Context) -> provision::Result<String> {
            Ok("ya29.token".into())
        }
    }

    fn configured() -> GkforgeConfig {
        GkforgeConfig {
            project: Some("go-microservice-app".into()),
            ..GkforgeConfig::default()
        }
    }

    #[test]
    fn test_missing_tools_become_issues() {
        let mut issues = Vec::new();
        check_tools(&mut issues, |tool| tool == "gcloud");

        let summaries: Vec<_> = issues.iter().map(|i| i.summary.as_str()).collect();
        assert_eq!(
            summaries,
            vec!["kubectl is not on PATH", "helm is not on PATH"]
        );
        assert_eq!(
            issues[0].fix_cmd.as_deref(),
            Some("gcloud components install kubectl")
        );
    }

    #[test]
    fn test_all_tools_present() {
        let mut issues = Vec::new();
        check_tools(&mut issues, |_| true);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_token_failure_is_an_issue() {
        let mut issues = Vec::new();
        check_credentials(&mut issues, &configured(), &FailingTokens);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, "Credentials");
        assert_eq!(issues[0].detail.as_deref(), Some("not logged in"));
    }

    #[test]
    fn test_token_success() {
        let mut issues = Vec::new();
        check_credentials(&mut issues, &configured(), &GoodTokens);
        assert!(issues.is_empty());
    }
}
