use crate::domain::models::Task;
use chrono::{DateTime, TimeZone};
use icu_collator::options::{CollatorOptions, Strength};
use icu_collator::{Collator, CollatorBorrowed, CollatorPreferences};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Inbox,
    Today,
    Upcoming,
}

impl FromStr for Bucket {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "inbox" => Ok(Self::Inbox),
            "today" => Ok(Self::Today),
            "upcoming" => Ok(Self::Upcoming),
            other => Err(format!("unknown bucket '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buckets {
    pub inbox: Vec<Task>,
    pub today: Vec<Task>,
    pub upcoming: Vec<Task>,
}

impl Buckets {
    pub fn get(&self, bucket: Bucket) -> &[Task] {
        match bucket {
            Bucket::Inbox => &self.inbox,
            Bucket::Today => &self.today,
            Bucket::Upcoming => &self.upcoming,
        }
    }

    /// Every task across the three buckets, first occurrence wins.
    pub fn unique_tasks(&self) -> Vec<Task> {
        let mut seen = HashSet::new();
        self.inbox
            .iter()
            .chain(&self.today)
            .chain(&self.upcoming)
            .filter(|task| seen.insert(task.id.clone()))
            .cloned()
            .collect()
    }
}

/// Partitions tasks by calendar day in the time zone of `now`. Tasks due
/// before today land in no date bucket.
pub fn bucket<Tz: TimeZone>(tasks: &[Task], now: &DateTime<Tz>) -> Buckets {
    let zone = now.timezone();
    let today = now.date_naive();
    let mut buckets = Buckets::default();

    for task in tasks {
        if task.project.is_none() {
            buckets.inbox.push(task.clone());
        }

        let Some(due_date) = task.due_date else {
            continue;
        };
        let due_day = due_date.with_timezone(&zone).date_naive();
        match due_day.cmp(&today) {
            Ordering::Equal => buckets.today.push(task.clone()),
            Ordering::Greater => buckets.upcoming.push(task.clone()),
            Ordering::Less => {}
        }
    }

    buckets
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    DueDate,
    CreationDate,
    Content,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "due_date" | "duedate" => Ok(Self::DueDate),
            "creation_date" | "creationdate" => Ok(Self::CreationDate),
            "content" => Ok(Self::Content),
            other => Err(format!("unknown sort key '{other}'")),
        }
    }
}

pub fn sort_tasks(tasks: &mut [Task], key: SortKey) {
    match key {
        SortKey::DueDate => tasks.sort_by(|left, right| {
            match (left.due_date, right.due_date) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
            .then_with(|| newest_first(left, right))
        }),
        SortKey::CreationDate => tasks.sort_by(newest_first),
        SortKey::Content => tasks.sort_by(|left, right| {
            compare_content(&left.content, &right.content).then_with(|| newest_first(left, right))
        }),
    }
}

// Root-locale collation at secondary strength: accents count, case does not.
fn content_collator() -> Option<&'static CollatorBorrowed<'static>> {
    static COLLATOR: OnceLock<Option<CollatorBorrowed<'static>>> = OnceLock::new();
    COLLATOR
        .get_or_init(|| {
            let mut options = CollatorOptions::default();
            options.strength = Some(Strength::Secondary);
            Collator::try_new(CollatorPreferences::default(), options).ok()
        })
        .as_ref()
}

fn compare_content(left: &str, right: &str) -> Ordering {
    match content_collator() {
        Some(collator) => collator.compare(left, right),
        None => left.to_lowercase().cmp(&right.to_lowercase()),
    }
}

// Non-numeric ids rank after every numeric one.
fn newest_first(left: &Task, right: &Task) -> Ordering {
    match (left.creation_rank(), right.creation_rank()) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => right.id.cmp(&left.id),
    }
}

pub fn filter_by_search(tasks: &[Task], query: &str) -> Vec<Task> {
    let needle = query.to_lowercase();
    if needle.is_empty() {
        return tasks.to_vec();
    }
    tasks
        .iter()
        .filter(|task| task.content.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskView {
    pub sort_key: SortKey,
    pub query: String,
}

impl TaskView {
    pub fn new(sort_key: SortKey, query: impl Into<String>) -> Self {
        Self {
            sort_key,
            query: query.into(),
        }
    }

    pub fn apply(&self, tasks: &[Task]) -> Vec<Task> {
        let mut filtered = filter_by_search(tasks, &self.query);
        sort_tasks(&mut filtered, self.sort_key);
        filtered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ProjectRef, TaskType};
    use chrono::{FixedOffset, Utc};
    use proptest::prelude::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn task(id: &str, content: &str, due: Option<&str>, project: bool) -> Task {
        Task {
            id: id.to_string(),
            content: content.to_string(),
            task_type: TaskType::Task,
            due_date: due.map(fixed_time),
            reminder_value: None,
            reminder_unit: None,
            project: project.then(|| ProjectRef {
                id: "p1".to_string(),
                name: "Work".to_string(),
            }),
            tags: Vec::new(),
        }
    }

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|task| task.id.as_str()).collect()
    }

    #[test]
    fn bucket_partitions_by_calendar_day() {
        let now = fixed_time("2026-02-16T15:00:00Z");
        let tasks = vec![
            task("1", "today midnight", Some("2026-02-16T00:00:00Z"), true),
            task("2", "tomorrow", Some("2026-02-17T08:00:00Z"), true),
            task("3", "no date inbox", None, false),
            task("4", "today late", Some("2026-02-16T23:59:59Z"), false),
        ];

        let buckets = bucket(&tasks, &now);
        assert_eq!(ids(&buckets.today), vec!["1", "4"]);
        assert_eq!(ids(&buckets.upcoming), vec!["2"]);
        assert_eq!(ids(&buckets.inbox), vec!["3", "4"]);
    }

    #[test]
    fn overdue_tasks_leave_every_date_bucket() {
        let now = fixed_time("2026-02-16T15:00:00Z");
        let tasks = vec![
            task("1", "overdue with project", Some("2026-02-15T23:00:00Z"), true),
            task("2", "overdue inbox", Some("2026-02-10T09:00:00Z"), false),
        ];

        let buckets = bucket(&tasks, &now);
        assert!(buckets.today.is_empty());
        assert!(buckets.upcoming.is_empty());
        assert_eq!(ids(&buckets.inbox), vec!["2"]);
    }

    #[test]
    fn bucket_uses_zone_of_now() {
        let zone = FixedOffset::east_opt(9 * 3600).expect("valid offset");
        let now = fixed_time("2026-02-16T20:00:00Z").with_timezone(&zone);
        // 2026-02-17 05:00 in +09:00, which is also "today" there.
        let tasks = vec![task("1", "early", Some("2026-02-16T20:00:00Z"), true)];
        let buckets = bucket(&tasks, &now);
        assert_eq!(ids(&buckets.today), vec!["1"]);
    }

    #[test]
    fn due_date_sort_puts_undated_last_and_breaks_ties_newest_first() {
        let mut tasks = vec![
            task("3", "c", None, false),
            task("10", "a", Some("2026-02-16T09:00:00Z"), false),
            task("12", "b", Some("2026-02-16T09:00:00Z"), false),
            task("2", "d", Some("2026-02-15T09:00:00Z"), false),
            task("7", "e", None, false),
        ];
        sort_tasks(&mut tasks, SortKey::DueDate);
        assert_eq!(ids(&tasks), vec!["2", "12", "10", "7", "3"]);
    }

    #[test]
    fn creation_sort_uses_numeric_id() {
        let mut tasks = vec![
            task("9", "a", None, false),
            task("10", "b", None, false),
            task("100", "c", None, false),
            task("abc", "d", None, false),
        ];
        sort_tasks(&mut tasks, SortKey::CreationDate);
        assert_eq!(ids(&tasks), vec!["100", "10", "9", "abc"]);
    }

    #[test]
    fn content_sort_is_case_insensitive_with_id_tiebreak() {
        let mut tasks = vec![
            task("1", "banana", None, false),
            task("2", "Apple", None, false),
            task("3", "apple", None, false),
            task("4", "apple", None, false),
        ];
        sort_tasks(&mut tasks, SortKey::Content);
        assert_eq!(ids(&tasks), vec!["4", "3", "2", "1"]);
    }

    #[test]
    fn content_sort_places_accented_letters_with_their_base_letter() {
        let mut tasks = vec![
            task("1", "zebra", None, false),
            task("2", "éclair", None, false),
            task("3", "apple", None, false),
            task("4", "Eclair", None, false),
        ];
        sort_tasks(&mut tasks, SortKey::Content);
        assert_eq!(ids(&tasks), vec!["3", "4", "2", "1"]);
    }

    #[test]
    fn search_is_case_insensitive_substring() {
        let tasks = vec![
            task("1", "Buy groceries", None, false),
            task("2", "Call mom", None, false),
        ];
        assert_eq!(ids(&filter_by_search(&tasks, "GROC")), vec!["1"]);
        assert_eq!(filter_by_search(&tasks, "").len(), 2);
    }

    #[test]
    fn search_matches_the_query_as_typed() {
        let tasks = vec![
            task("1", "report", None, false),
            task("2", "report draft", None, false),
        ];
        assert_eq!(ids(&filter_by_search(&tasks, "report ")), vec!["2"]);
        assert!(filter_by_search(&tasks, "  ").is_empty());
    }

    #[test]
    fn view_filters_before_sorting() {
        let tasks = vec![
            task("1", "report draft", Some("2026-02-17T09:00:00Z"), false),
            task("2", "report final", Some("2026-02-16T09:00:00Z"), false),
            task("3", "lunch", Some("2026-02-15T09:00:00Z"), false),
        ];
        let view = TaskView::new(SortKey::DueDate, "Report");
        assert_eq!(ids(&view.apply(&tasks)), vec!["2", "1"]);
    }

    #[test]
    fn unique_tasks_dedups_across_buckets() {
        let now = fixed_time("2026-02-16T15:00:00Z");
        let tasks = vec![
            task("1", "inbox today", Some("2026-02-16T18:00:00Z"), false),
            task("2", "upcoming", Some("2026-02-18T18:00:00Z"), true),
        ];
        let buckets = bucket(&tasks, &now);
        assert_eq!(ids(&buckets.unique_tasks()), vec!["1", "2"]);
    }

    #[test]
    fn sort_key_parses_cli_spellings() {
        assert_eq!("due-date".parse::<SortKey>(), Ok(SortKey::DueDate));
        assert_eq!("creationDate".parse::<SortKey>(), Ok(SortKey::CreationDate));
        assert!("priority".parse::<SortKey>().is_err());
    }

    proptest! {
        #[test]
        fn projectless_tasks_always_in_inbox(hours in -96i64..96i64, has_project in any::<bool>()) {
            let now = fixed_time("2026-02-16T12:00:00Z");
            let due = now + chrono::Duration::hours(hours);
            let mut item = task("1", "x", None, has_project);
            item.due_date = Some(due);

            let buckets = bucket(&[item], &now);
            prop_assert_eq!(buckets.inbox.len(), usize::from(!has_project));
            let in_today = !buckets.today.is_empty();
            let in_upcoming = !buckets.upcoming.is_empty();
            prop_assert!(!(in_today && in_upcoming));
            prop_assert_eq!(in_today, due.date_naive() == now.date_naive());
            prop_assert_eq!(in_upcoming, due.date_naive() > now.date_naive());
        }
    }
}
