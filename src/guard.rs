use std::fmt;

use tracing::debug;

use crate::session::SessionState;

/// Pages of the client. Each subcommand renders one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Home,
    Login,
    Register,
    Account,
    History,
    RiskPredictor,
    PredictionResult,
    Profile,
    Models,
}

impl Route {
    pub fn policy(self) -> Policy {
        match self {
            Self::Account | Self::History | Self::Profile => Policy::AuthenticatedOnly,
            Self::Login | Self::Register => Policy::GuestOnly,
            Self::Home | Self::RiskPredictor | Self::PredictionResult | Self::Models => {
                Policy::Public
            }
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Self::Home => "/",
            Self::Login => "/login",
            Self::Register => "/register",
            Self::Account => "/account",
            Self::History => "/history",
            Self::RiskPredictor => "/risk-predictor",
            Self::PredictionResult => "/result",
            Self::Profile => "/profile",
            Self::Models => "/models",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Public,
    AuthenticatedOnly,
    GuestOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Session not resolved yet; show a placeholder.
    Loading,
    Render,
    /// Go elsewhere. `replace` drops the guarded entry from history.
    Redirect { to: Route, replace: bool },
}

pub fn evaluate(policy: Policy, state: &SessionState) -> Outcome {
    if policy == Policy::Public {
        return Outcome::Render;
    }
    if state.is_loading() {
        return Outcome::Loading;
    }
    match (policy, state.is_logged_in()) {
        (Policy::AuthenticatedOnly, false) => Outcome::Redirect {
            to: Route::Login,
            replace: true,
        },
        (Policy::GuestOnly, true) => Outcome::Redirect {
            to: Route::Account,
            replace: true,
        },
        _ => Outcome::Render,
    }
}

/// Browser-style history with guarded navigation.
#[derive(Debug, Clone)]
pub struct Navigator {
    entries: Vec<Route>,
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new(Route::Home)
    }
}

impl Navigator {
    pub fn new(start: Route) -> Self {
        Self {
            entries: vec![start],
        }
    }

    pub fn current(&self) -> Route {
        *self.entries.last().unwrap_or(&Route::Home)
    }

    pub fn entries(&self) -> &[Route] {
        &self.entries
    }

    /// Navigates to `route`, following at most one redirect per hop.
    ///
    /// Returns the outcome for the page that ends up current. A redirect
    /// replaces the entry it came from, so going back never lands on the
    /// guarded page.
    pub fn navigate(&mut self, route: Route, state: &SessionState) -> Outcome {
        self.entries.push(route);
        let mut outcome = evaluate(route.policy(), state);

        // Login and Account guard opposite states, so this settles in one step.
        for _ in 0..2 {
            let Outcome::Redirect { to, replace } = outcome else {
                break;
            };
            debug!(from = %self.current(), to = %to, "guard redirect");
            if replace {
                self.entries.pop();
            }
            self.entries.push(to);
            outcome = evaluate(to.policy(), state);
        }
        outcome
    }

    pub fn back(&mut self) -> Route {
        if self.entries.len() > 1 {
            self.entries.pop();
        }
        self.current()
    }
}
