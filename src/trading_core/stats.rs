//! Run statistics over closed trades

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A closed trade reduced to what statistics need
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredTrade {
    pub entry_time: DateTime<Utc>,
    pub pnl: f64,
    /// Strategy-specific win definition
    pub win: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStatistics {
    pub total_trades: usize,
    pub winning_trades: usize,
    /// Trades with negative pnl
    pub losing_trades: usize,
    pub total_pnl: f64,
    /// winning / total, percent
    pub win_rate: f64,
    pub avg_pnl: f64,
    pub max_consecutive_wins: usize,
    pub max_consecutive_losses: usize,
    pub max_consecutive_wins_pnl: f64,
    pub max_consecutive_losses_pnl: f64,
}

impl TradeStatistics {
    /// Aggregate closed trades.
    ///
    /// Streaks run in entry-time order; pnl > 0 extends a win streak and
    /// anything else a loss streak.
    pub fn from_trades(trades: &[ScoredTrade]) -> Self {
        if trades.is_empty() {
            return Self::default();
        }

        let mut ordered = trades.to_vec();
        ordered.sort_by_key(|t| t.entry_time);

        let total_trades = ordered.len();
        let winning_trades = ordered.iter().filter(|t| t.win).count();
        let losing_trades = ordered.iter().filter(|t| t.pnl < 0.0).count();
        let total_pnl: f64 = ordered.iter().map(|t| t.pnl).sum();

        let mut stats = Self {
            total_trades,
            winning_trades,
            losing_trades,
            total_pnl: round2(total_pnl),
            win_rate: round2(winning_trades as f64 / total_trades as f64 * 100.0),
            avg_pnl: round2(total_pnl / total_trades as f64),
            ..Default::default()
        };

        let (mut wins, mut losses) = (0usize, 0usize);
        let (mut wins_pnl, mut losses_pnl) = (0.0, 0.0);
        for trade in &ordered {
            if trade.pnl > 0.0 {
                wins += 1;
                wins_pnl += trade.pnl;
                losses = 0;
                losses_pnl = 0.0;
                if wins > stats.max_consecutive_wins {
                    stats.max_consecutive_wins = wins;
                    stats.max_consecutive_wins_pnl = round2(wins_pnl);
                }
            } else {
                losses += 1;
                losses_pnl += trade.pnl;
                wins = 0;
                wins_pnl = 0.0;
                if losses > stats.max_consecutive_losses {
                    stats.max_consecutive_losses = losses;
                    stats.max_consecutive_losses_pnl = round2(losses_pnl);
                }
            }
        }

        stats
    }
}

impl std::fmt::Display for TradeStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Trades: {} | Wins: {} | Losses: {} | Win rate: {:.2}% | Total: {:+.2} pts | Avg: {:+.2} pts | Streaks W{} ({:+.2}) / L{} ({:+.2})",
            self.total_trades,
            self.winning_trades,
            self.losing_trades,
            self.win_rate,
            self.total_pnl,
            self.avg_pnl,
            self.max_consecutive_wins,
            self.max_consecutive_wins_pnl,
            self.max_consecutive_losses,
            self.max_consecutive_losses_pnl
        )
    }
}

/// Round to two decimals for reporting
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn trade(day: i64, pnl: f64, win: bool) -> ScoredTrade {
        ScoredTrade {
            entry_time: Utc.with_ymd_and_hms(2024, 11, 1, 4, 0, 0).unwrap() + Duration::days(day),
            pnl,
            win,
        }
    }

    #[test]
    fn test_empty() {
        assert_eq!(TradeStatistics::from_trades(&[]), TradeStatistics::default());
    }

    #[test]
    fn test_target_wins_and_negative_losses() {
        // A trailed stop-out with positive pnl is neither a win nor a loss
        let trades = vec![trade(0, 18.0, true), trade(1, -20.0, false), trade(2, 5.0, false)];
        let stats = TradeStatistics::from_trades(&trades);
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.winning_trades, 1);
        assert_eq!(stats.losing_trades, 1);
        assert_eq!(stats.total_pnl, 3.0);
        assert_eq!(stats.win_rate, 33.33);
        assert_eq!(stats.avg_pnl, 1.0);
    }

    #[test]
    fn test_streaks_are_chronological() {
        // Supplied out of order; chronological pnl: +10 +5 -3 -4 -1 0 +2
        let trades = vec![
            trade(6, 2.0, true),
            trade(0, 10.0, true),
            trade(3, -4.0, false),
            trade(1, 5.0, true),
            trade(5, 0.0, false),
            trade(2, -3.0, false),
            trade(4, -1.0, false),
        ];
        let stats = TradeStatistics::from_trades(&trades);
        assert_eq!(stats.max_consecutive_wins, 2);
        assert_eq!(stats.max_consecutive_wins_pnl, 15.0);
        // Zero pnl counts toward the losing streak
        assert_eq!(stats.max_consecutive_losses, 4);
        assert_eq!(stats.max_consecutive_losses_pnl, -8.0);
    }
}
