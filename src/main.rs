//! Command-line entry point for the TuDuDi companion.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use clap::{Args, Parser, Subcommand};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tududi_companion::application::commands::{
    add_item_impl, delete_task_impl, edit_task_impl, list_tasks_impl, reschedule_tasks_impl,
    show_settings_impl, update_settings_impl, AppState, SettingsUpdate, TaskEdit,
};
use tududi_companion::application::dashboard::{DashboardSnapshot, REFRESH_INTERVAL};
use tududi_companion::application::worker::notification_channel;
use tududi_companion::domain::buckets::{Bucket, SortKey, TaskView};
use tududi_companion::domain::models::{AddItemPayload, ReminderUnit, Task, TaskType};
use tududi_companion::domain::reschedule::{ReschedulePayload, RescheduleUnit};
use tududi_companion::infrastructure::logging::{init_logging, LoggingHandle};
use tududi_companion::infrastructure::notifier::{DesktopNotificationSurface, LogNotificationSurface};

/// Quick capture and reminders for a TuDuDi server.
#[derive(Parser)]
#[command(name = "tududi-companion", version, about)]
struct Cli {
    /// Directory holding config/ and state/. Defaults to the current directory.
    #[arg(short, long)]
    workspace: Option<PathBuf>,

    /// IANA time zone used for buckets and rescheduling, e.g. "Europe/Berlin".
    #[arg(long)]
    timezone: Option<String>,

    /// Log at debug level.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the reminder worker until Ctrl+C.
    Worker {
        /// Log reminders instead of showing desktop notifications.
        #[arg(long)]
        headless: bool,
    },

    /// Show one bucket of tasks.
    List(ListArgs),

    /// Add a task, note or project.
    Add(AddArgs),

    /// Change fields of a task.
    Edit(EditArgs),

    /// Delete a task.
    Delete { task_id: String },

    /// Move tasks to a date or by a relative amount.
    Reschedule(RescheduleArgs),

    /// Read or change settings.
    #[command(subcommand)]
    Settings(SettingsCommand),
}

#[derive(Args)]
struct ListArgs {
    /// inbox, today or upcoming.
    #[arg(short, long, default_value = "today")]
    bucket: Bucket,

    /// due-date, creation-date or content.
    #[arg(short, long, default_value = "due-date")]
    sort: SortKey,

    /// Case-insensitive substring filter on content.
    #[arg(long, default_value = "")]
    search: String,

    /// Print as JSON.
    #[arg(long)]
    json: bool,

    /// Keep refreshing every 20 seconds until Ctrl+C.
    #[arg(long)]
    watch: bool,
}

#[derive(Args)]
struct AddArgs {
    content: String,

    #[arg(short = 't', long = "type", default_value = "task")]
    item_type: TaskType,

    #[arg(short, long)]
    project: Option<String>,

    /// Due date as YYYY-MM-DD.
    #[arg(short, long)]
    due: Option<NaiveDate>,

    /// Reminder before the due date, e.g. "30m", "2h", "1d".
    #[arg(short, long, value_parser = parse_reminder)]
    reminder: Option<(u32, ReminderUnit)>,
}

#[derive(Args)]
struct EditArgs {
    task_id: String,

    #[arg(short, long)]
    content: Option<String>,

    /// RFC 3339 timestamp, or "none" to clear.
    #[arg(short, long)]
    due: Option<String>,

    /// e.g. "30m", "2h", "1d", or "none" to clear.
    #[arg(short, long)]
    reminder: Option<String>,
}

#[derive(Args)]
struct RescheduleArgs {
    #[arg(required = true)]
    task_ids: Vec<String>,

    /// Move to local midnight of this date (YYYY-MM-DD).
    #[arg(long, conflicts_with_all = ["by", "unit"])]
    on: Option<NaiveDate>,

    /// Shift by this many units; negative moves earlier.
    #[arg(long, requires = "unit", allow_negative_numbers = true)]
    by: Option<i64>,

    /// minutes, hours, days, months or years.
    #[arg(long)]
    unit: Option<RescheduleUnit>,
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Print current settings; the password is never shown.
    Show,

    /// Change settings. Pass an empty string to clear a text field.
    Set {
        #[arg(long)]
        server_url: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        notifications: Option<bool>,
        #[arg(long)]
        dev_mode: Option<bool>,
        #[arg(long)]
        console_logging: Option<bool>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let logging = init_logging(cli.verbose)?;

    let workspace_root = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let state = AppState::new(workspace_root).context("failed to prepare workspace")?;
    logging.apply(&state.settings()?)?;
    debug!(
        workspace = %state.workspace_root().display(),
        config = %state.config_dir().display(),
        database = %state.database_path().display(),
        "workspace ready"
    );

    if let Command::Worker { headless } = cli.command {
        return run_worker(&state, logging, headless).await;
    }

    match cli.timezone {
        Some(name) => {
            let zone: Tz = name
                .parse()
                .map_err(|error| anyhow!("unknown time zone '{name}': {error}"))?;
            run_command(&state, cli.command, zone).await
        }
        None => run_command(&state, cli.command, Local).await,
    }
}

async fn run_worker(
    state: &AppState,
    logging: LoggingHandle,
    headless: bool,
) -> anyhow::Result<()> {
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
        }
    };

    if headless {
        state
            .reminder_worker(Arc::new(LogNotificationSurface), notification_channel())
            .with_logging(logging)
            .run_until(shutdown)
            .await;
    } else {
        let (events_tx, events_rx) = notification_channel();
        let surface = DesktopNotificationSurface::default().with_events(events_tx.clone());
        state
            .reminder_worker(Arc::new(surface), (events_tx, events_rx))
            .with_logging(logging)
            .run_until(shutdown)
            .await;
    }
    Ok(())
}

async fn run_command<Z>(state: &AppState, command: Command, zone: Z) -> anyhow::Result<()>
where
    Z: TimeZone,
    Z::Offset: Display,
{
    match command {
        Command::Worker { .. } => Err(anyhow!("worker is handled before time zone selection")),
        Command::List(args) => {
            let view = TaskView::new(args.sort, args.search);
            if args.watch {
                return watch(state, zone, args.bucket, &view).await;
            }
            let tasks = list_tasks_impl(state, zone.clone(), args.bucket, &view).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&tasks)?);
            } else {
                print_tasks(&tasks, &zone);
            }
            Ok(())
        }
        Command::Add(args) => {
            let payload = AddItemPayload {
                content: args.content,
                item_type: args.item_type,
                project_id: args.project,
                due_date: args.due,
                reminder_value: args.reminder.map(|(value, _)| value),
                reminder_unit: args.reminder.map(|(_, unit)| unit),
            };
            add_item_impl(state, payload).await?;
            println!("Added.");
            Ok(())
        }
        Command::Edit(args) => {
            let edit = TaskEdit {
                content: args.content,
                due_date: args
                    .due
                    .as_deref()
                    .map(parse_optional_due)
                    .transpose()
                    .map_err(|error| anyhow!(error))?,
                reminder: args
                    .reminder
                    .as_deref()
                    .map(parse_optional_reminder)
                    .transpose()
                    .map_err(|error| anyhow!(error))?,
            };
            let task = edit_task_impl(state, &args.task_id, &edit).await?;
            print_tasks(std::slice::from_ref(&task), &zone);
            Ok(())
        }
        Command::Delete { task_id } => {
            delete_task_impl(state, &task_id).await?;
            println!("Deleted task {task_id}.");
            Ok(())
        }
        Command::Reschedule(args) => {
            let payload = match (args.on, args.by, args.unit) {
                (Some(date), _, _) => ReschedulePayload::Specific { date },
                (None, Some(value), Some(unit)) => ReschedulePayload::Relative { value, unit },
                _ => return Err(anyhow!("pass either --on DATE or --by N --unit UNIT")),
            };
            let edited = reschedule_tasks_impl(state, zone, &args.task_ids, &payload).await?;
            println!("Rescheduled {edited} task(s).");
            Ok(())
        }
        Command::Settings(SettingsCommand::Show) => {
            let settings = show_settings_impl(state)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Command::Settings(SettingsCommand::Set {
            server_url,
            username,
            password,
            notifications,
            dev_mode,
            console_logging,
        }) => {
            let update = SettingsUpdate {
                server_url,
                username,
                password,
                notifications_enabled: notifications,
                dev_mode_enabled: dev_mode,
                console_logging_enabled: console_logging,
            };
            let settings = update_settings_impl(state, &update)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
    }
}

async fn watch<Z>(state: &AppState, zone: Z, bucket: Bucket, view: &TaskView) -> anyhow::Result<()>
where
    Z: TimeZone,
    Z::Offset: Display,
{
    let mut dashboard = state.dashboard(zone.clone())?;
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    dashboard
        .watch(
            REFRESH_INTERVAL,
            |snapshot: &DashboardSnapshot| {
                if let Some(error) = &snapshot.error {
                    eprintln!("{error}");
                }
                println!("--- {bucket:?} ---");
                print_tasks(&view.apply(snapshot.buckets.get(bucket)), &zone);
            },
            shutdown,
        )
        .await;
    Ok(())
}

fn print_tasks<Z>(tasks: &[Task], zone: &Z)
where
    Z: TimeZone,
    Z::Offset: Display,
{
    if tasks.is_empty() {
        println!("No tasks.");
        return;
    }
    for task in tasks {
        let due = task
            .due_date
            .map(|due_date| due_date.with_timezone(zone).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let project = task
            .project
            .as_ref()
            .map(|project| format!(" [{}]", project.name))
            .unwrap_or_default();
        let headline = task.content.lines().next().unwrap_or_default();
        println!("{:>8}  {:<16}  {headline}{project}", task.id, due);
    }
}

fn parse_reminder(value: &str) -> Result<(u32, ReminderUnit), String> {
    let value = value.trim();
    let split = value
        .find(|character: char| !character.is_ascii_digit())
        .ok_or_else(|| format!("missing unit in '{value}'"))?;
    let (amount, unit) = value.split_at(split);
    let amount: u32 = amount
        .parse()
        .map_err(|_| format!("invalid reminder amount in '{value}'"))?;
    if amount == 0 {
        return Err("reminder amount must be > 0".to_string());
    }
    Ok((amount, unit.parse()?))
}

fn parse_optional_reminder(value: &str) -> Result<Option<(u32, ReminderUnit)>, String> {
    if value.trim().eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    parse_reminder(value).map(Some)
}

fn parse_optional_due(value: &str) -> Result<Option<DateTime<Utc>>, String> {
    if value.trim().eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    DateTime::parse_from_rfc3339(value.trim())
        .map(|parsed| Some(parsed.with_timezone(&Utc)))
        .map_err(|error| format!("invalid timestamp '{value}': {error}"))
}
