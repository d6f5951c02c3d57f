//! Readiness probe answer derived from the terminating flag
//!
//! See <https://kubernetes.io/docs/reference/using-api/health-checks/>.

/// What a `/readyz` handler should answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// 200 "ok"
    Ready,
    /// 503 "terminating"
    Terminating,
}

impl Readiness {
    pub fn of(is_terminating: bool) -> Self {
        if is_terminating {
            Self::Terminating
        } else {
            Self::Ready
        }
    }

    pub fn status_code(self) -> u16 {
        match self {
            Self::Ready => 200,
            Self::Terminating => 503,
        }
    }

    pub fn body(self) -> &'static str {
        match self {
            Self::Ready => "ok",
            Self::Terminating => "terminating",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_before_signal() {
        let r = Readiness::of(false);
        assert_eq!(r, Readiness::Ready);
        assert_eq!(r.status_code(), 200);
        assert_eq!(r.body(), "ok");
    }

    #[test]
    fn terminating_after_signal() {
        let r = Readiness::of(true);
        assert_eq!(r.status_code(), 503);
        assert_eq!(r.body(), "terminating");
    }
}
