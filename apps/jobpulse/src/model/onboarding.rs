use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingStep {
    Welcome,
    ConnectEmail,
    EmailFilter,
    DiscordIntegration,
    AllSet,
}

impl OnboardingStep {
    pub const SEQUENCE: [OnboardingStep; 5] = [
        OnboardingStep::Welcome,
        OnboardingStep::ConnectEmail,
        OnboardingStep::EmailFilter,
        OnboardingStep::DiscordIntegration,
        OnboardingStep::AllSet,
    ];

    pub fn title(&self) -> &'static str {
        match self {
            OnboardingStep::Welcome => "Welcome to JobPulse",
            OnboardingStep::ConnectEmail => "Connect Your Email",
            OnboardingStep::EmailFilter => "Filter Your Inbox",
            OnboardingStep::DiscordIntegration => "Discord Integration",
            OnboardingStep::AllSet => "All Set!",
        }
    }
}

/// Persisted under the `onboarding` key as `{ "onboarding": n, "completed": b }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingState {
    #[serde(rename = "onboarding", default)]
    pub step_index: usize,
    #[serde(default)]
    pub completed: bool,
}

impl Default for OnboardingState {
    fn default() -> Self {
        Self {
            step_index: 0,
            completed: false,
        }
    }
}

impl OnboardingState {
    pub fn step(&self) -> OnboardingStep {
        let last = OnboardingStep::SEQUENCE.len() - 1;
        OnboardingStep::SEQUENCE[self.step_index.min(last)]
    }

    pub fn is_last_step(&self) -> bool {
        self.step_index + 1 >= OnboardingStep::SEQUENCE.len()
    }

    /// Moves one step forward; stepping past the last step completes the flow.
    pub fn advance(&mut self) {
        if self.completed {
            return;
        }
        if self.is_last_step() {
            self.completed = true;
        } else {
            self.step_index += 1;
        }
    }

    pub fn back(&mut self) {
        if !self.completed {
            self.step_index = self.step_index.saturating_sub(1);
        }
    }

    /// Leaving through the Discord-integration action also counts as done.
    pub fn complete(&mut self) {
        self.completed = true;
    }

    pub fn should_prompt(&self) -> bool {
        !self.completed
    }
}
