//! services/api/src/web/context.rs
//!
//! Assembles the generation prompt for one conversational turn: a fixed
//! system instruction, a bounded summary of the caller's learning state,
//! the recent conversation, and the new message.

use goal_coach_core::domain::{GoalContext, ProfileContext, Sender};
use goal_coach_core::ports::{ChatStore, PortResult};

/// How many prior turns are replayed into the prompt as memory.
pub const MEMORY_TURN_LIMIT: i64 = 10;

const SYSTEM_PROMPT: &str = "You are an encouraging learning coach. You help people make steady \
progress on their personal learning goals through short, supportive conversation.

Style:
- Sound like a real person talking, not a textbook.
- Keep replies to a few sentences unless the learner clearly wants more depth.
- Use the learner's goal and milestone details when they help, and nudge \
toward the next concrete step when it feels natural.
- Never invent goals or progress the context does not mention.";

/// Builds the full prompt for `user_id`'s new message.
///
/// With a goal reference the context block is that goal's detail and
/// milestone progress, scoped to the caller; a goal the caller does not own
/// contributes nothing. Without one it is the profile aggregate. Either way
/// the last [`MEMORY_TURN_LIMIT`] turns are replayed oldest-first.
pub async fn assemble(
    store: &dyn ChatStore,
    user_id: i64,
    goal_id: Option<i64>,
    user_text: &str,
) -> PortResult<String> {
    let context_block = match goal_id {
        Some(goal_id) => match store.get_goal_context(goal_id, user_id).await? {
            Some(goal) => render_goal(&goal),
            // Unknown or foreign goal: advisory context only, so fail closed
            // with an empty block rather than an error.
            None => String::new(),
        },
        None => render_profile(&store.get_profile_context(user_id).await?),
    };

    let mut memory = store.get_recent_turns(user_id, MEMORY_TURN_LIMIT).await?;
    memory.reverse(); // store returns newest-first; present oldest-first

    let mut prompt = String::from(SYSTEM_PROMPT);

    if !context_block.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(&context_block);
    }

    if !memory.is_empty() {
        prompt.push_str("\n\nRecent conversation:\n");
        for turn in &memory {
            let label = match turn.sender {
                Sender::User => "User",
                Sender::Ai => "Assistant",
            };
            prompt.push_str(label);
            prompt.push_str(": ");
            prompt.push_str(&turn.message);
            prompt.push('\n');
        }
    }

    prompt.push_str("\nUser: ");
    prompt.push_str(user_text);
    prompt.push_str("\nAssistant:");

    Ok(prompt)
}

/// Renders one goal's detail and milestone progress.
fn render_goal(goal: &GoalContext) -> String {
    let mut block = format!(
        "Current goal: {} (status: {})",
        goal.title,
        goal.status.as_str()
    );
    if let Some(description) = &goal.description {
        block.push_str(&format!("\nDescription: {description}"));
    }
    if let Some(level) = &goal.difficulty_level {
        block.push_str(&format!("\nDifficulty: {level}"));
    }
    if let Some(weeks) = goal.estimated_duration_weeks {
        block.push_str(&format!("\nEstimated duration: {weeks} weeks"));
    }

    let (done, total) = goal.completion();
    if total > 0 {
        block.push_str(&format!("\nMilestones: {done}/{total} complete"));
    }
    if let Some(next) = goal.next_milestone() {
        block.push_str(&format!("\nNext milestone: {}", next.title));
        if let Some(due) = next.due_date {
            block.push_str(&format!(" (due {due})"));
        }
    }

    block
}

/// Renders the profile aggregate used when no goal is referenced.
fn render_profile(profile: &ProfileContext) -> String {
    let mut block = format!(
        "Learner profile: {} goals ({} active, {} completed), {}/{} milestones complete, {} chat messages so far.",
        profile.total_goals,
        profile.active_goals,
        profile.completed_goals,
        profile.completed_milestones,
        profile.total_milestones,
        profile.total_chat_messages,
    );

    if !profile.recent_active_goals.is_empty() {
        block.push_str("\nRecently worked on:");
        for goal in &profile.recent_active_goals {
            block.push_str(&format!("\n- {} ({})", goal.title, goal.status.as_str()));
            if let Some(level) = &goal.difficulty_level {
                block.push_str(&format!(", {level}"));
            }
        }
    }

    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::testing::MockStore;
    use chrono::NaiveDate;
    use goal_coach_core::domain::{GoalStatus, GoalSummary, MilestoneContext, Sender};
    use std::sync::Arc;

    fn sample_goal() -> GoalContext {
        GoalContext {
            title: "Conversational Spanish".to_string(),
            description: Some("Hold a 10-minute conversation".to_string()),
            status: GoalStatus::Active,
            difficulty_level: Some("intermediate".to_string()),
            estimated_duration_weeks: Some(12),
            milestones: vec![
                MilestoneContext {
                    title: "Finish unit 1".to_string(),
                    completed: true,
                    due_date: None,
                    position: 0,
                },
                MilestoneContext {
                    title: "First tutoring session".to_string(),
                    completed: false,
                    due_date: NaiveDate::from_ymd_opt(2024, 6, 1),
                    position: 1,
                },
            ],
        }
    }

    #[tokio::test]
    async fn goal_context_includes_progress_and_next_milestone() {
        let store = Arc::new(MockStore::new());
        store.insert_goal(5, 1, sample_goal());

        let prompt = assemble(store.as_ref(), 1, Some(5), "how am I doing?")
            .await
            .unwrap();

        assert!(prompt.contains("Current goal: Conversational Spanish"));
        assert!(prompt.contains("Milestones: 1/2 complete"));
        assert!(prompt.contains("Next milestone: First tutoring session (due 2024-06-01)"));
        assert!(prompt.ends_with("User: how am I doing?\nAssistant:"));
    }

    #[tokio::test]
    async fn foreign_goal_contributes_no_context() {
        let store = Arc::new(MockStore::new());
        // The goal exists, but belongs to user 2.
        store.insert_goal(5, 2, sample_goal());

        let prompt = assemble(store.as_ref(), 1, Some(5), "hello").await.unwrap();

        assert!(!prompt.contains("Conversational Spanish"));
        assert!(!prompt.contains("Current goal"));
    }

    #[tokio::test]
    async fn profile_context_is_used_without_a_goal_reference() {
        let store = Arc::new(MockStore::new());
        store.set_profile(
            1,
            ProfileContext {
                total_goals: 4,
                active_goals: 2,
                completed_goals: 1,
                total_milestones: 9,
                completed_milestones: 3,
                total_chat_messages: 27,
                recent_active_goals: vec![GoalSummary {
                    title: "Learn sourdough".to_string(),
                    status: GoalStatus::Paused,
                    difficulty_level: None,
                }],
            },
        );

        let prompt = assemble(store.as_ref(), 1, None, "hi").await.unwrap();

        assert!(prompt.contains("4 goals (2 active, 1 completed)"));
        assert!(prompt.contains("3/9 milestones complete"));
        assert!(prompt.contains("- Learn sourdough (paused)"));
    }

    #[tokio::test]
    async fn memory_is_bounded_and_oldest_first() {
        let store = Arc::new(MockStore::new());
        for i in 0..12 {
            store.seed_turn(1, None, &format!("turn {i}"), Sender::User).await;
        }

        let prompt = assemble(store.as_ref(), 1, None, "latest").await.unwrap();

        // Only the last 10 turns survive, and the oldest of them comes first.
        assert!(!prompt.contains("turn 0\n"));
        assert!(!prompt.contains("turn 1\n"));
        let early = prompt.find("turn 2").expect("turn 2 in prompt");
        let late = prompt.find("turn 11").expect("turn 11 in prompt");
        assert!(early < late);
    }
}
