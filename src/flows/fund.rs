//! Fund analysis flow
//!
//! ```text
//! init_fund_analysis
//!   -> analyze_investment_strategy
//!   -> strategy_router --growth_analysis--> analyze_tech_trends -> evaluate_growth_potential --+
//!                      --value_analysis---> screen_stable_companies -> evaluate_value_potential -+
//!   -> synthesize_portfolio (first of the two evaluations) -> finalize_investment_recommendation
//! ```

use super::{CatalogError, required_text, with_deps};
use crate::agent::{Agent, AgentTask, ScriptedAgent};
use crate::engine::{Flow, Step, StepContext, StepError, StepOutput, Trigger};
use crate::prompt::PromptRenderer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const ROLE_STRATEGIST: &str = "investment strategy router";
pub const ROLE_TECH_ANALYST: &str = "technology trend and company analyst";
pub const ROLE_GROWTH_ANALYST: &str = "growth potential analyst";
pub const ROLE_STABILITY_ANALYST: &str = "stability screening analyst";
pub const ROLE_DIVIDEND_ANALYST: &str = "dividend policy analyst";
pub const ROLE_PORTFOLIO_MANAGER: &str = "portfolio construction manager";

pub const LABEL_GROWTH: &str = "growth_analysis";
pub const LABEL_VALUE: &str = "value_analysis";

/// Allocations may drift this far from 1.0 before we complain
const ALLOCATION_TOLERANCE: f64 = 0.01;
/// No single holding should exceed this share
const MAX_SINGLE_ALLOCATION: f64 = 0.5;

const STRATEGY_PROMPT: &str = r#"
Analyze the client's investment profile:
- Investment goal: {{ investment_goal }}
- Risk preference: {{ risk_preference }}
- Budget: ${{ budget | money }}

Pick exactly one strategy:
1. 'growth' - growth stocks (technology, innovation, AI)
2. 'value' - value and dividend stocks (stability, income, conservative)

Answer with only 'growth' or 'value'.
"#;

const TECH_TRENDS_PROMPT: &str = r#"
Client investment goal: {{ investment_goal }}
Risk preference: {{ risk_preference }}

Research the technology trends the market is watching right now:
1. Identify the 3-4 technology sectors best suited to the client's goal
2. For each sector, estimate market size, growth rate and outlook

Summarize each sector with its growth potential, main drivers and an outlook.
"#;

const COMPANY_DISCOVERY_PROMPT: &str = r#"
Using this trend analysis:

{{ trends }}

Find candidate companies for each sector:
1. Prefer NASDAQ/NYSE listings, at most 3 per sector
2. Confirm ticker symbols and exact company names
3. Describe each business model, technical edge and market position

Group the result by sector: tickers, names, business summary, competitive advantage.
"#;

const GROWTH_PROMPT: &str = r#"
Client investment goal: {{ investment_goal }}
Risk preference: {{ risk_preference }}

Technology trends:
{{ tech_trends.trends }}

Candidate companies:
{{ tech_trends.candidates }}

Score each candidate's growth potential from 0 to 100 using revenue growth,
market expansion, technical moat and valuation. Give the score and a short
justification for every ticker.
"#;

const STABILITY_PROMPT: &str = r#"
Client investment goal: {{ investment_goal }}
Risk preference: {{ risk_preference }}

Screen large, financially stable companies suited to a value strategy:
1. Prefer NYSE/NASDAQ blue chips with long operating histories
2. Check debt ratio, cash flow consistency and earnings volatility
3. Select 5-8 candidates and score their stability from 0 to 100

List each candidate with ticker, name, stability score and reasoning.
"#;

const DIVIDEND_PROMPT: &str = r#"
Client investment goal: {{ investment_goal }}
Risk preference: {{ risk_preference }}

Stability screening:
{{ stability_scores }}

Evaluate the dividend policy of each screened company: yield, payout ratio,
years of consecutive increases and sustainability. Score each from 0 to 100
with a short justification.
"#;

const PORTFOLIO_PROMPT: &str = r#"
Client profile:
- Investment goal: {{ investment_goal }}
- Risk preference: {{ risk_preference }}
- Budget: ${{ budget | money }}
- Chosen strategy: {{ strategy_type }}

{% if strategy_type == "growth" -%}
Growth analysis:
- Technology trends: {{ tech_trends.trends }}
- Growth scores: {{ growth_scores }}
{%- else -%}
Value/dividend analysis:
- Stability scores: {{ stability_scores }}
- Dividend scores: {{ dividend_scores }}
{%- endif %}

Build the portfolio:
1. Select 3-5 of the highest scoring companies
2. Allocate according to risk preference (aggressive: concentrate 30-50% in
   core holdings; conservative: spread 20-35% each)
3. No single holding above 50%
4. Allocations must sum to exactly 1.0; amount = budget * allocation
5. Justify each pick with the analysts' actual scores

Reply with pure JSON only, no markdown:
{"strategy": "...", "holdings": [{"ticker": "...", "name": "...", "allocation": 0.0, "amount": 0.0, "reason": "..."}], "summary": "..."}
"#;

/// Output of the technology analysis stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechTrends {
    pub trends: String,
    pub candidates: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,
    #[serde(default)]
    pub name: String,
    pub allocation: f64,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub reason: String,
}

/// Final recommendation; the flow's value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    #[serde(default)]
    pub strategy: String,
    pub holdings: Vec<Holding>,
    #[serde(default)]
    pub summary: String,
}

impl Portfolio {
    /// Recompute amounts from the budget; returns the allocation total
    pub fn reconcile(&mut self, budget: f64) -> f64 {
        for holding in &mut self.holdings {
            holding.amount = (budget * holding.allocation * 100.0).round() / 100.0;
        }

        let total: f64 = self.holdings.iter().map(|h| h.allocation).sum();
        if (total - 1.0).abs() > ALLOCATION_TOLERANCE {
            tracing::warn!(total, "Portfolio allocations do not sum to 1.0");
        }
        for holding in self.holdings.iter().filter(|h| h.allocation > MAX_SINGLE_ALLOCATION) {
            tracing::warn!(ticker = %holding.ticker, allocation = holding.allocation, "Holding exceeds the single-position cap");
        }
        total
    }
}

struct FundDeps {
    agent: Arc<dyn Agent>,
    prompts: PromptRenderer,
}

impl FundDeps {
    async fn ask(&self, role: &str, goal: &str, template: &str, ctx: &StepContext) -> Result<String, StepError> {
        let prompt = self.prompts.render(template, &ctx.snapshot())?;
        let task = AgentTask::new(role, prompt).with_goal(goal);
        Ok(self.agent.complete(&task).await?.text)
    }
}

fn prompts() -> Result<PromptRenderer, CatalogError> {
    Ok(PromptRenderer::new()
        .with("strategy", STRATEGY_PROMPT)?
        .with("tech_trends", TECH_TRENDS_PROMPT)?
        .with("company_discovery", COMPANY_DISCOVERY_PROMPT)?
        .with("growth", GROWTH_PROMPT)?
        .with("stability", STABILITY_PROMPT)?
        .with("dividend", DIVIDEND_PROMPT)?
        .with("portfolio", PORTFOLIO_PROMPT)?)
}

/// Assemble the fund analysis flow
pub fn build(agent: Arc<dyn Agent>) -> Result<Flow, CatalogError> {
    let deps = Arc::new(FundDeps {
        agent,
        prompts: prompts()?,
    });

    let flow = Flow::builder("fund")
        .description("Investment strategy routing with growth and value analysis teams")
        .step(
            Step::new("init_fund_analysis", Trigger::on_start(), init_fund_analysis)
                .describe("Check the investment goal, risk preference and budget"),
        )
        .step(
            Step::new(
                "analyze_investment_strategy",
                Trigger::on_complete("init_fund_analysis"),
                with_deps(&deps, analyze_investment_strategy),
            )
            .writes(["strategy_type"])
            .describe("Decide between a growth and a value strategy"),
        )
        .step(Step::router(
            "strategy_router",
            Trigger::on_complete("analyze_investment_strategy"),
            [LABEL_GROWTH, LABEL_VALUE],
            strategy_router,
        ))
        .step(
            Step::new(
                "analyze_tech_trends",
                Trigger::on_label(LABEL_GROWTH),
                with_deps(&deps, analyze_tech_trends),
            )
            .writes(["tech_trends"]),
        )
        .step(
            Step::new(
                "evaluate_growth_potential",
                Trigger::on_complete("analyze_tech_trends"),
                with_deps(&deps, evaluate_growth_potential),
            )
            .writes(["growth_scores"]),
        )
        .step(
            Step::new(
                "screen_stable_companies",
                Trigger::on_label(LABEL_VALUE),
                with_deps(&deps, screen_stable_companies),
            )
            .writes(["stability_scores"]),
        )
        .step(
            Step::new(
                "evaluate_value_potential",
                Trigger::on_complete("screen_stable_companies"),
                with_deps(&deps, evaluate_value_potential),
            )
            .writes(["dividend_scores"]),
        )
        .step(
            Step::new(
                "synthesize_portfolio",
                Trigger::on_complete("evaluate_growth_potential")
                    .or(Trigger::on_complete("evaluate_value_potential")),
                with_deps(&deps, synthesize_portfolio),
            )
            .writes(["portfolio"])
            .describe("Join whichever analysis branch ran into a portfolio"),
        )
        .step(Step::new(
            "finalize_investment_recommendation",
            Trigger::on_complete("synthesize_portfolio"),
            finalize_investment_recommendation,
        ))
        .build()?;

    Ok(flow)
}

async fn init_fund_analysis(ctx: StepContext) -> Result<StepOutput, StepError> {
    required_text(&ctx, "investment_goal", "investment goal")?;
    required_text(&ctx, "risk_preference", "risk preference")?;

    match ctx.get_opt::<f64>("budget") {
        Ok(Some(budget)) if budget > 0.0 => Ok(StepOutput::new()),
        Ok(Some(_)) => Err(StepError::validation("budget must be greater than zero")),
        Ok(None) => Err(StepError::validation("budget is required")),
        Err(_) => Err(StepError::validation("budget must be a number")),
    }
}

async fn analyze_investment_strategy(deps: Arc<FundDeps>, ctx: StepContext) -> Result<StepOutput, StepError> {
    let answer = deps
        .ask(
            ROLE_STRATEGIST,
            "Decide whether the client's goal calls for growth or value/dividend investing",
            "strategy",
            &ctx,
        )
        .await?;

    let strategy = if answer.to_lowercase().contains("growth") {
        "growth"
    } else {
        "value"
    };
    tracing::info!(strategy, "Investment strategy chosen");

    Ok(StepOutput::new().set("strategy_type", strategy)?)
}

async fn strategy_router(ctx: StepContext) -> Result<StepOutput, StepError> {
    let strategy: String = ctx.get("strategy_type")?;
    Ok(match strategy.as_str() {
        "growth" => StepOutput::new().route(LABEL_GROWTH),
        "value" => StepOutput::new().route(LABEL_VALUE),
        other => {
            tracing::warn!(strategy = other, "Unrecognized strategy, ending flow");
            StepOutput::new().terminate()
        }
    })
}

async fn analyze_tech_trends(deps: Arc<FundDeps>, ctx: StepContext) -> Result<StepOutput, StepError> {
    let goal = "Identify technology trends and candidate companies that fit the client's goal";
    let trends = deps.ask(ROLE_TECH_ANALYST, goal, "tech_trends", &ctx).await?;

    let prompt = deps
        .prompts
        .render("company_discovery", &serde_json::json!({ "trends": trends }))?;
    let candidates = deps
        .agent
        .complete(&AgentTask::new(ROLE_TECH_ANALYST, prompt).with_goal(goal))
        .await?
        .text;

    Ok(StepOutput::new().set("tech_trends", TechTrends { trends, candidates })?)
}

async fn evaluate_growth_potential(deps: Arc<FundDeps>, ctx: StepContext) -> Result<StepOutput, StepError> {
    let scores = deps
        .ask(
            ROLE_GROWTH_ANALYST,
            "Score the growth potential of each candidate company",
            "growth",
            &ctx,
        )
        .await?;
    Ok(StepOutput::new().set("growth_scores", scores)?)
}

async fn screen_stable_companies(deps: Arc<FundDeps>, ctx: StepContext) -> Result<StepOutput, StepError> {
    let scores = deps
        .ask(
            ROLE_STABILITY_ANALYST,
            "Find financially stable companies suited to a value strategy",
            "stability",
            &ctx,
        )
        .await?;
    Ok(StepOutput::new().set("stability_scores", scores)?)
}

async fn evaluate_value_potential(deps: Arc<FundDeps>, ctx: StepContext) -> Result<StepOutput, StepError> {
    let scores = deps
        .ask(
            ROLE_DIVIDEND_ANALYST,
            "Evaluate the dividend policy of each screened company",
            "dividend",
            &ctx,
        )
        .await?;
    Ok(StepOutput::new().set("dividend_scores", scores)?)
}

async fn synthesize_portfolio(deps: Arc<FundDeps>, ctx: StepContext) -> Result<StepOutput, StepError> {
    let prompt = deps.prompts.render("portfolio", &ctx.snapshot())?;
    let task = AgentTask::new(ROLE_PORTFOLIO_MANAGER, prompt)
        .with_goal("Combine the analysts' results into a portfolio matching the client's goal, risk and budget");
    let reply = deps.agent.complete(&task).await?;

    let mut portfolio: Portfolio = reply.json()?;
    if portfolio.strategy.is_empty() {
        portfolio.strategy = ctx.get("strategy_type")?;
    }
    let budget: f64 = ctx.get("budget")?;
    portfolio.reconcile(budget);

    tracing::info!(holdings = portfolio.holdings.len(), strategy = %portfolio.strategy, "Portfolio synthesized");
    Ok(StepOutput::new().set("portfolio", portfolio)?)
}

async fn finalize_investment_recommendation(ctx: StepContext) -> Result<StepOutput, StepError> {
    let portfolio: Portfolio = ctx.get("portfolio")?;
    Ok(StepOutput::new().value(portfolio)?)
}

/// Canned replies for a dry run of this flow
pub fn scripted_agent() -> ScriptedAgent {
    ScriptedAgent::new("dry-run")
        .with_reply(ROLE_STRATEGIST, "growth")
        .with_replies(
            ROLE_TECH_ANALYST,
            [
                "AI infrastructure (30% CAGR), robotics (20% CAGR), cybersecurity (12% CAGR)",
                "AI infrastructure: NVDA, AMD. Robotics: ISRG. Cybersecurity: CRWD.",
            ],
        )
        .with_reply(ROLE_GROWTH_ANALYST, "NVDA 92, CRWD 84, ISRG 80, AMD 78")
        .with_reply(ROLE_STABILITY_ANALYST, "JNJ 90, KO 88, PG 87")
        .with_reply(ROLE_DIVIDEND_ANALYST, "KO 91, JNJ 89, PG 86")
        .with_reply(
            ROLE_PORTFOLIO_MANAGER,
            r#"{"strategy": "growth", "holdings": [
                {"ticker": "NVDA", "name": "NVIDIA", "allocation": 0.4, "reason": "growth score 92"},
                {"ticker": "CRWD", "name": "CrowdStrike", "allocation": 0.35, "reason": "growth score 84"},
                {"ticker": "ISRG", "name": "Intuitive Surgical", "allocation": 0.25, "reason": "growth score 80"}
            ], "summary": "Concentrated AI and automation exposure for an aggressive profile"}"#,
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{FlowError, FlowOutcome};
    use serde_json::json;

    fn growth_inputs() -> serde_json::Value {
        json!({
            "investment_goal": "I want to invest in cutting-edge tech like AI",
            "risk_preference": "aggressive",
            "budget": 20000.0,
        })
    }

    async fn run(agent: Arc<ScriptedAgent>, inputs: serde_json::Value) -> Result<FlowOutcome, FlowError> {
        build(agent).unwrap().kickoff(inputs).await
    }

    #[tokio::test]
    async fn test_growth_path() {
        let agent = Arc::new(scripted_agent());
        let outcome = run(Arc::clone(&agent), growth_inputs()).await.unwrap();

        assert_eq!(
            outcome.order(),
            vec![
                "init_fund_analysis",
                "analyze_investment_strategy",
                "strategy_router",
                "analyze_tech_trends",
                "evaluate_growth_potential",
                "synthesize_portfolio",
                "finalize_investment_recommendation",
            ]
        );
        assert!(!outcome.ran("screen_stable_companies"));
        assert_eq!(outcome.final_step.as_deref(), Some("finalize_investment_recommendation"));

        let portfolio: Portfolio = outcome.value_as().unwrap();
        assert_eq!(portfolio.holdings.len(), 3);
        assert_eq!(portfolio.holdings[0].amount, 8000.0);
        assert_eq!(portfolio.holdings[2].amount, 5000.0);

        let prompt = &agent.calls_for(ROLE_PORTFOLIO_MANAGER)[0].prompt;
        assert!(prompt.contains("Budget: $20,000"));
        assert!(prompt.contains("NVDA 92"));
        assert!(!prompt.contains("Stability scores"));
    }

    #[tokio::test]
    async fn test_value_path() {
        let agent = Arc::new(
            ScriptedAgent::new("test")
                .with_reply(ROLE_STRATEGIST, "Value: the client wants stable dividends")
                .with_reply(ROLE_STABILITY_ANALYST, "KO 88")
                .with_reply(ROLE_DIVIDEND_ANALYST, "KO 91")
                .with_reply(
                    ROLE_PORTFOLIO_MANAGER,
                    r#"{"holdings": [{"ticker": "KO", "allocation": 1.0}]}"#,
                ),
        );
        let outcome = run(
            Arc::clone(&agent),
            json!({
                "investment_goal": "steady dividends for retirement",
                "risk_preference": "conservative",
                "budget": 50000,
            }),
        )
        .await
        .unwrap();

        assert!(!outcome.ran("analyze_tech_trends"));
        assert_eq!(outcome.runs_of("synthesize_portfolio"), 1);
        assert_eq!(outcome.state.get::<String>("strategy_type").unwrap(), "value");

        let portfolio: Portfolio = outcome.value_as().unwrap();
        assert_eq!(portfolio.strategy, "value");
        assert_eq!(portfolio.holdings[0].amount, 50000.0);
        assert!(agent.calls_for(ROLE_GROWTH_ANALYST).is_empty());
    }

    #[tokio::test]
    async fn test_missing_inputs_fail_validation() {
        let agent = Arc::new(scripted_agent());

        let err = run(Arc::clone(&agent), json!({"investment_goal": "AI", "risk_preference": "aggressive"}))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Validation { ref message, .. } if message.contains("budget")));

        let err = run(
            Arc::clone(&agent),
            json!({"investment_goal": "  ", "risk_preference": "aggressive", "budget": 100}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, FlowError::Validation { ref message, .. } if message.contains("goal")));

        assert!(agent.calls().is_empty());
    }

    #[tokio::test]
    async fn test_zero_budget_rejected() {
        let mut inputs = growth_inputs();
        inputs["budget"] = json!(0);
        let err = run(Arc::new(scripted_agent()), inputs).await.unwrap_err();
        assert!(matches!(err, FlowError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_unparseable_portfolio_fails_step() {
        let agent = Arc::new(
            ScriptedAgent::new("test")
                .with_reply(ROLE_STRATEGIST, "value")
                .with_fallback("I recommend a balanced mix."),
        );
        let err = run(agent, growth_inputs()).await.unwrap_err();
        assert!(matches!(
            err,
            FlowError::StepFailed { ref step, source: StepError::Agent(_) } if step == "synthesize_portfolio"
        ));
    }

    #[test]
    fn test_reconcile_amounts() {
        let mut portfolio = Portfolio {
            strategy: "growth".into(),
            holdings: vec![
                Holding {
                    ticker: "A".into(),
                    name: String::new(),
                    allocation: 0.6,
                    amount: 1.0,
                    reason: String::new(),
                },
                Holding {
                    ticker: "B".into(),
                    name: String::new(),
                    allocation: 0.3,
                    amount: 0.0,
                    reason: String::new(),
                },
            ],
            summary: String::new(),
        };

        let total = portfolio.reconcile(1000.0);
        assert!((total - 0.9).abs() < 1e-9);
        assert_eq!(portfolio.holdings[0].amount, 600.0);
        assert_eq!(portfolio.holdings[1].amount, 300.0);
    }
}
