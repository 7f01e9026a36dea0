/// User-initiated turns allowed per session.
pub const MAX_ACTIONS: u32 = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetCheck {
    Granted,
    /// First rejected attempt; the caller shows the limit message once.
    JustExhausted,
    Exhausted,
}

#[derive(Debug, Clone, Default)]
pub struct ActionBudget {
    used: u32,
    limit_announced: bool,
}

impl ActionBudget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= MAX_ACTIONS
    }

    pub fn try_consume(&mut self) -> BudgetCheck {
        if !self.is_exhausted() {
            self.used += 1;
            return BudgetCheck::Granted;
        }
        if self.limit_announced {
            BudgetCheck::Exhausted
        } else {
            self.limit_announced = true;
            BudgetCheck::JustExhausted
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn announces_exhaustion_once() {
        let mut budget = ActionBudget::new();
        for _ in 0..MAX_ACTIONS {
            assert_eq!(budget.try_consume(), BudgetCheck::Granted);
        }
        assert!(budget.is_exhausted());
        assert_eq!(budget.try_consume(), BudgetCheck::JustExhausted);
        assert_eq!(budget.try_consume(), BudgetCheck::Exhausted);
        assert_eq!(budget.used(), MAX_ACTIONS);

        budget.reset();
        assert_eq!(budget.used(), 0);
        assert_eq!(budget.try_consume(), BudgetCheck::Granted);
    }
}
