//! `qa-agents` — the perception (C7) and decision (C8) agents: the two LLM
//! roles that sit on either side of the blackboard's plan/perception cycle.
//!
//! Both agents follow the same defensive shape: build a strict-JSON prompt,
//! call the LLM, and fall back to a safe, low-confidence result rather than
//! propagate a parse or transport error. Neither agent ever touches the
//! blackboard directly; the coordinator (C10) owns all state mutation.

pub mod decision;
pub mod perception;

pub use decision::{decide, DecisionMode};
pub use perception::perceive;
