use std::io::{self, Write};

use anyhow::{Context, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use clap::Subcommand;
use taskmaster_core::auth::SessionManager;
use taskmaster_core::config::Config;
use taskmaster_core::models::{
    ProjectDraft, TaskDraft, TaskFilter, TaskPriority, TaskStatus, UserProfile,
};
use taskmaster_core::utils::format::{
    format_deadline, is_overdue, priority_label, status_label, truncate_string,
};
use tracing::warn;

/// Maximum title width in task listings
const TITLE_WIDTH: usize = 40;

#[derive(Subcommand)]
pub enum Command {
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: Option<String>,
    },
    /// End the session and forget stored tokens
    Logout,
    /// Show the logged-in user
    Whoami,
    /// Show whether a session is active
    Status,
    /// Work with tasks
    #[command(subcommand)]
    Tasks(TaskCommand),
    /// Work with projects
    #[command(subcommand)]
    Projects(ProjectCommand),
    /// Work with pending invitations
    #[command(subcommand)]
    Invitations(InvitationCommand),
}

#[derive(Subcommand)]
pub enum TaskCommand {
    /// List tasks
    List {
        #[arg(long, value_parser = parse_status)]
        status: Option<TaskStatus>,
        #[arg(long)]
        project: Option<i64>,
        #[arg(long)]
        page: Option<u32>,
    },
    /// Create a task
    Add {
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, value_parser = parse_status, default_value = "TODO")]
        status: TaskStatus,
        #[arg(long, value_parser = parse_priority)]
        priority: Option<TaskPriority>,
        #[arg(long)]
        project: Option<i64>,
        /// Deadline as YYYY-MM-DD
        #[arg(long, value_parser = parse_deadline)]
        deadline: Option<chrono::DateTime<Utc>>,
    },
    /// Move a task to another column
    Move {
        id: i64,
        #[arg(value_parser = parse_status)]
        status: TaskStatus,
    },
    /// Delete a task
    Rm { id: i64 },
}

#[derive(Subcommand)]
pub enum ProjectCommand {
    /// List projects
    List,
    /// Create a project
    Add {
        title: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// List the members of a project
    Members { id: i64 },
    /// Invite someone to a project by email
    Invite { id: i64, email: String },
    /// Leave a project
    Leave { id: i64 },
}

#[derive(Subcommand)]
pub enum InvitationCommand {
    /// List pending invitations
    List,
    /// Accept an invitation
    Accept { token: String },
    /// Decline an invitation
    Decline { token: String },
}

impl Command {
    /// The front-end route this command stands for, checked by the session guard
    pub fn route(&self) -> &'static str {
        match self {
            Command::Login { .. } => "/login",
            Command::Logout | Command::Status => "/",
            Command::Whoami => "/profile",
            Command::Tasks(_) => "/tasks",
            Command::Projects(_) => "/projects",
            Command::Invitations(_) => "/invitations",
        }
    }

    /// Whether startup should fetch the user's profile before running
    pub fn restores_profile(&self) -> bool {
        !matches!(self, Command::Login { .. } | Command::Logout)
    }
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
    TaskStatus::parse(s).ok_or_else(|| {
        let valid: Vec<&str> = TaskStatus::ALL.iter().map(|s| s.as_str()).collect();
        format!("unknown status '{}' (expected one of {})", s, valid.join(", "))
    })
}

fn parse_priority(s: &str) -> Result<TaskPriority, String> {
    TaskPriority::parse(s).ok_or_else(|| format!("unknown priority '{}' (low, medium, high)", s))
}

fn parse_deadline(s: &str) -> Result<chrono::DateTime<Utc>, String> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{}': {}", s, e))?;
    let end_of_day = date
        .and_hms_opt(23, 59, 59)
        .ok_or_else(|| format!("invalid date '{}'", s))?;
    Ok(Utc.from_utc_datetime(&end_of_day))
}

fn describe_user(user: &UserProfile) -> String {
    format!("{} (id {})", user.display_name(), user.id)
}

fn prompt_email(default: Option<&str>) -> Result<String> {
    match default {
        Some(email) => print!("Email [{}]: ", email),
        None => print!("Email: "),
    }
    io::stdout().flush()?;

    let mut email = String::new();
    io::stdin().read_line(&mut email)?;
    let email = email.trim();
    match (email.is_empty(), default) {
        (true, Some(default)) => Ok(default.to_string()),
        _ => Ok(email.to_string()),
    }
}

pub async fn run(command: Command, manager: &SessionManager, config: &mut Config) -> Result<()> {
    match command {
        Command::Login { email } => login(manager, config, email).await,
        Command::Logout => {
            manager.logout();
            println!("Logged out.");
            Ok(())
        }
        Command::Whoami => {
            match manager.current_user() {
                Some(user) => println!("{}", describe_user(&user)),
                None => println!("Logged in (profile unavailable)"),
            }
            Ok(())
        }
        Command::Status => {
            if manager.is_authenticated() {
                let name = manager
                    .current_user()
                    .map(|u| u.display_name())
                    .unwrap_or_else(|| "unknown user".to_string());
                println!("Logged in as {} ({})", name, config.api_base_url);
            } else {
                println!("Not logged in ({})", config.api_base_url);
            }
            Ok(())
        }
        Command::Tasks(cmd) => tasks(manager, cmd).await,
        Command::Projects(cmd) => projects(manager, cmd).await,
        Command::Invitations(cmd) => invitations(manager, cmd).await,
    }
}

async fn login(manager: &SessionManager, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email {
        Some(email) => email,
        None => prompt_email(config.last_email.as_deref())?,
    };
    if email.is_empty() {
        anyhow::bail!("Email required");
    }
    let password = rpassword::prompt_password("Password: ")?;
    if password.is_empty() {
        anyhow::bail!("Password required");
    }

    let user = manager
        .login(&email, &password)
        .await
        .context("Login failed")?;

    config.last_email = Some(email);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }

    println!("Logged in as {}.", user.display_name());
    Ok(())
}

async fn tasks(manager: &SessionManager, cmd: TaskCommand) -> Result<()> {
    let api = manager.api();
    match cmd {
        TaskCommand::List {
            status,
            project,
            page,
        } => {
            let filter = TaskFilter {
                status,
                project,
                page,
                page_size: None,
            };
            let page = api.list_tasks(&filter).await?;
            if page.results.is_empty() {
                println!("No tasks.");
                return Ok(());
            }
            let now = Utc::now();
            for task in &page.results {
                let deadline = match task.deadline {
                    Some(d) if task.status != TaskStatus::Done && is_overdue(d, now) => {
                        format!("! {}", format_deadline(d, now))
                    }
                    Some(d) => format_deadline(d, now),
                    None => String::new(),
                };
                println!(
                    "{:>5}  {:<12} {:<7} {:<width$} {}",
                    task.id,
                    status_label(task.status),
                    priority_label(task.priority),
                    truncate_string(&task.title, TITLE_WIDTH),
                    deadline,
                    width = TITLE_WIDTH
                );
            }
            if page.has_more() {
                println!("({} tasks total, more with --page)", page.count);
            }
        }
        TaskCommand::Add {
            title,
            description,
            status,
            priority,
            project,
            deadline,
        } => {
            let draft = TaskDraft {
                description,
                status,
                priority,
                deadline,
                project,
                ..TaskDraft::new(title)
            };
            let task = api.create_task(&draft).await?;
            println!("Created task {}: {}", task.id, task.title);
        }
        TaskCommand::Move { id, status } => {
            let task = api.get_task(id).await?;
            let draft = TaskDraft {
                status,
                ..TaskDraft::from_task(&task)
            };
            api.update_task(id, &draft).await?;
            println!("Moved task {} to {}", id, status_label(status));
        }
        TaskCommand::Rm { id } => {
            api.delete_task(id).await?;
            println!("Deleted task {}", id);
        }
    }
    Ok(())
}

async fn projects(manager: &SessionManager, cmd: ProjectCommand) -> Result<()> {
    let api = manager.api();
    match cmd {
        ProjectCommand::List => {
            let projects = api.list_projects().await?;
            if projects.is_empty() {
                println!("No projects.");
            }
            let me = manager.current_user();
            for project in projects {
                let owner = match me {
                    Some(ref me) if project.is_owned_by(me) => "you".to_string(),
                    _ => project.owner.display_name(),
                };
                println!(
                    "{:>5}  {:<30} {:<10} owner: {}",
                    project.id,
                    truncate_string(&project.title, 30),
                    project.display_task_count(),
                    owner
                );
            }
        }
        ProjectCommand::Add { title, description } => {
            let project = api
                .create_project(&ProjectDraft { title, description })
                .await?;
            println!("Created project {}: {}", project.id, project.title);
        }
        ProjectCommand::Members { id } => {
            for member in api.project_members(id).await? {
                println!("{:>5}  {}", member.id, member.display_name());
            }
        }
        ProjectCommand::Invite { id, email } => {
            api.invite(id, &email).await?;
            println!("Invited {} to project {}", email, id);
        }
        ProjectCommand::Leave { id } => {
            api.leave_project(id).await?;
            println!("Left project {}", id);
        }
    }
    Ok(())
}

async fn invitations(manager: &SessionManager, cmd: InvitationCommand) -> Result<()> {
    let api = manager.api();
    match cmd {
        InvitationCommand::List => {
            let pending = api.pending_invitations().await?;
            if pending.is_empty() {
                println!("No pending invitations.");
            }
            for invitation in pending {
                println!(
                    "{}  {} (from {})",
                    invitation.token,
                    invitation.project.title,
                    invitation.invited_by.display_name()
                );
            }
        }
        InvitationCommand::Accept { token } => {
            api.accept_invitation(&token).await?;
            println!("Invitation accepted.");
        }
        InvitationCommand::Decline { token } => {
            api.decline_invitation(&token).await?;
            println!("Invitation declined.");
        }
    }
    Ok(())
}
