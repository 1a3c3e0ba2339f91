use rust_decimal::Decimal;

use crate::models::{Opportunity, OpportunityStage, PipelineSummary, StageSummary};

pub fn summarize_pipeline(opportunities: &[Opportunity]) -> PipelineSummary {
    let stages: Vec<StageSummary> = OpportunityStage::ALL
        .iter()
        .map(|&stage| {
            let in_stage = opportunities.iter().filter(|o| o.stage == stage);
            StageSummary {
                stage,
                count: in_stage.clone().count(),
                total_value: in_stage.map(|o| o.value).sum(),
            }
        })
        .collect();

    let open_value: Decimal = stages
        .iter()
        .filter(|s| s.stage.is_open())
        .map(|s| s.total_value)
        .sum();
    let stage_count = |stage: OpportunityStage| {
        stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.count)
            .unwrap_or(0)
    };
    let won = stage_count(OpportunityStage::Ganha);
    let lost = stage_count(OpportunityStage::Perdida);
    let won_value = stages
        .iter()
        .find(|s| s.stage == OpportunityStage::Ganha)
        .map(|s| s.total_value)
        .unwrap_or(Decimal::ZERO);
    let win_rate = if won + lost == 0 {
        None
    } else {
        Some(won as f64 / (won + lost) as f64)
    };

    PipelineSummary {
        stages,
        open_value,
        won_value,
        win_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opp(stage: OpportunityStage, value: i64) -> Opportunity {
        Opportunity {
            id: None,
            customer_id: None,
            title: None,
            stage,
            value: Decimal::new(value, 2),
        }
    }

    #[test]
    fn groups_by_stage_in_pipeline_order() {
        let opps = vec![
            opp(OpportunityStage::Ganha, 100_000),
            opp(OpportunityStage::Nova, 20_010),
            opp(OpportunityStage::Nova, 30_020),
            opp(OpportunityStage::PropostaEnviada, 5_000),
            opp(OpportunityStage::Perdida, 40_000),
        ];
        let summary = summarize_pipeline(&opps);
        let order: Vec<_> = summary.stages.iter().map(|s| s.stage).collect();
        assert_eq!(order, OpportunityStage::ALL.to_vec());
        assert_eq!(summary.stages[0].count, 2);
        assert_eq!(summary.stages[0].total_value, Decimal::new(50_030, 2));
        assert_eq!(summary.stages[1].count, 0);
        assert_eq!(summary.open_value, Decimal::new(55_030, 2));
        assert_eq!(summary.won_value, Decimal::new(1000, 0));
        assert_eq!(summary.win_rate, Some(0.5));
    }

    #[test]
    fn win_rate_is_undefined_without_closed_deals() {
        let summary = summarize_pipeline(&[opp(OpportunityStage::Contactada, 1_000)]);
        assert_eq!(summary.win_rate, None);
        assert_eq!(summary.open_value, Decimal::TEN);
        let empty = summarize_pipeline(&[]);
        assert_eq!(empty.stages.len(), 5);
        assert_eq!(empty.open_value, Decimal::ZERO);
    }
}
