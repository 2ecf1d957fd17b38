use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use patchloop_db::{Database, TaskFilter, TaskRecord, TaskStore};
use patchloop_logging::{EventKind, IterationRecord};

#[derive(Subcommand, Debug)]
pub enum TasksAction {
    /// List recorded tasks, newest first
    List {
        /// Filter by status (pending, planning, ..., completed, failed)
        #[arg(long)]
        status: Option<String>,

        /// Search description text
        #[arg(long)]
        search: Option<String>,

        /// Show at most this many tasks
        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one task with its event trail
    Show {
        /// Task id (a unique prefix is enough)
        id: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

pub fn handle_tasks_command(db: &Database, action: TasksAction) -> Result<()> {
    match action {
        TasksAction::List {
            status,
            search,
            limit,
            json,
        } => {
            let filter = TaskFilter {
                status,
                search,
                limit: Some(limit),
            };
            let tasks = db.list(&filter).context("Failed to list tasks")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else if tasks.is_empty() {
                println!("{}", "No tasks found.".dimmed());
            } else {
                print_tasks_table(&tasks);
            }
        }
        TasksAction::Show { id, json } => {
            let task = resolve_task(db, &id)?;
            let events = db
                .events()
                .list(&task.id)
                .context("Failed to read task events")?;

            if json {
                let value = serde_json::json!({ "task": task, "events": events });
                println!("{}", serde_json::to_string_pretty(&value)?);
            } else {
                print_task_detail(&task, &events);
            }
        }
    }

    Ok(())
}

/// Exact id, or the single task whose id starts with `id`
fn resolve_task(db: &Database, id: &str) -> Result<TaskRecord> {
    if let Some(task) = db.get(id)? {
        return Ok(task);
    }

    let mut matches: Vec<TaskRecord> = db
        .list(&TaskFilter::default())?
        .into_iter()
        .filter(|t| t.id.starts_with(id))
        .collect();

    match matches.len() {
        0 => anyhow::bail!("No task found with id {}", id),
        1 => Ok(matches.remove(0)),
        n => anyhow::bail!("Id prefix {} matches {} tasks; use more characters", id, n),
    }
}

fn colored_status(status: &str) -> String {
    match status {
        "completed" => status.bright_green().to_string(),
        "failed" => status.bright_red().to_string(),
        "pending" => status.dimmed().to_string(),
        _ => status.bright_cyan().to_string(),
    }
}

fn preview(text: &str, max: usize) -> String {
    let line = text.lines().next().unwrap_or("");
    if line.chars().count() > max {
        format!("{}...", line.chars().take(max).collect::<String>())
    } else {
        line.to_string()
    }
}

fn print_tasks_table(tasks: &[TaskRecord]) {
    println!(
        "{:<10} {:<18} {:<11} {:<7} {}",
        "ID".dimmed(),
        "CREATED".dimmed(),
        "STATUS".dimmed(),
        "ITERS".dimmed(),
        "DESCRIPTION".dimmed(),
    );

    for t in tasks {
        let short_id: String = t.id.chars().take(8).collect();
        println!(
            "{:<10} {:<18} {:<20} {:<7} {}",
            short_id,
            t.created_at.format("%Y-%m-%d %H:%M"),
            colored_status(&t.status),
            format!("{}/{}", t.current_iteration, t.max_iterations),
            preview(&t.description, 50)
        );
    }
}

fn print_task_detail(task: &TaskRecord, events: &[IterationRecord]) {
    println!("{}", "=== Task Detail ===".bright_blue().bold());
    println!("{}  {}", "ID:".dimmed(), task.id);
    println!(
        "{}  {}",
        "Created:".dimmed(),
        task.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!("{}  {}", "Source:".dimmed(), task.source.display());
    println!("{}  {}", "Workspace:".dimmed(), task.workspace.display());
    println!("{}  {}", "Status:".dimmed(), colored_status(&task.status));
    println!(
        "{}  {}/{}",
        "Iterations:".dimmed(),
        task.current_iteration,
        task.max_iterations
    );
    if let Some(ref reason) = task.reason {
        println!("{}  {}", "Reason:".dimmed(), reason);
    }
    println!();
    println!("{}", "Description:".dimmed());
    println!("  {}", task.description);

    if events.is_empty() {
        return;
    }

    println!();
    println!(
        "{}",
        format!("--- Events ({}) ---", events.len()).dimmed()
    );
    for record in events {
        let name = match record.kind {
            EventKind::Error => record.name.bright_red().to_string(),
            EventKind::Terminal => record.name.bright_magenta().to_string(),
            EventKind::VerificationResult => record.name.bright_yellow().to_string(),
            _ => record.name.bright_blue().to_string(),
        };
        println!(
            "  {} {:>3} {:<22} {}",
            record.timestamp.format("%H:%M:%S").to_string().dimmed(),
            record.iteration,
            name,
            preview(&record.message, 100)
        );
    }
}
