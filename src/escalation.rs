//! Auto-escalation scheduler: on first contact with a domain, walk an
//! ordered ladder of (engine × proxy × render-delay) steps, judge each
//! result by content shape, and persist the winning step so later fetches
//! route straight to it.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::core::config::ServiceConfig;
use crate::core::domain::extract_domain;
use crate::core::error::FetchError;
use crate::core::event_log::EventLog;
use crate::core::quality;
use crate::core::types::{EngineKind, EscalationStep, FetchRequest, FetchResult};
use crate::engines::{dispatch, EngineCall, EngineContext};
use crate::profiles::{ProfileInput, ProfileStore};

/// Render delays for the browser rungs, in ladder order.
const BROWSER_DELAY_MS: u64 = 2_000;
const STEALTH_DELAY_MS: u64 = 3_000;
const STEALTH_RETRY_DELAY_MS: u64 = 5_000;

/// Derive the ladder from live config. Steps whose prerequisites are not
/// configured simply do not appear.
pub fn build_ladder(cfg: &ServiceConfig) -> Vec<EscalationStep> {
    let has_proxy = cfg.proxy_url.is_some();
    let has_remote = cfg.browserless_url.is_some();

    let mut steps = Vec::with_capacity(6);

    if has_proxy {
        steps.push(EscalationStep {
            engine: EngineKind::Fast,
            render_js: false,
            render_delay_ms: 0,
            use_proxy: true,
            label: "fast+proxy",
        });
    }

    steps.push(EscalationStep {
        engine: EngineKind::Fast,
        render_js: false,
        render_delay_ms: 0,
        use_proxy: false,
        label: "fast+direct",
    });

    if has_remote {
        steps.push(EscalationStep {
            engine: EngineKind::Browser,
            render_js: true,
            render_delay_ms: BROWSER_DELAY_MS,
            use_proxy: false,
            label: "browser+2s",
        });
    }

    steps.push(EscalationStep {
        engine: EngineKind::Stealth,
        render_js: true,
        render_delay_ms: STEALTH_DELAY_MS,
        use_proxy: false,
        label: "stealth+3s",
    });

    if has_remote {
        steps.push(EscalationStep {
            engine: EngineKind::Stealth,
            render_js: true,
            render_delay_ms: STEALTH_RETRY_DELAY_MS,
            use_proxy: false,
            label: "stealth+5s",
        });
        steps.push(EscalationStep {
            engine: EngineKind::Unblock,
            render_js: false,
            render_delay_ms: 0,
            use_proxy: false,
            label: "unblock",
        });
    }

    steps
}

pub struct LadderWin {
    pub result: FetchResult,
    pub step: EscalationStep,
    pub index: usize,
}

/// Walk the ladder with the given attempt function. Step errors are logged
/// and treated exactly like insufficient content: continue. The first step
/// whose result satisfies the quality judge wins. Cancellation is the one
/// error that is not absorbed — it aborts the walk before any profile
/// write can happen.
pub async fn walk_ladder<F, Fut>(
    steps: &[EscalationStep],
    mut attempt: F,
    events: &EventLog,
) -> Result<LadderWin, FetchError>
where
    F: FnMut(usize, EscalationStep) -> Fut,
    Fut: Future<Output = Result<FetchResult, FetchError>>,
{
    for (index, step) in steps.iter().enumerate() {
        match attempt(index, step.clone()).await {
            Ok(result) => {
                if quality::sufficient(&result.content, result.status_code) {
                    info!(
                        "Escalation step {} ({}) won with status {}",
                        index, step.label, result.status_code
                    );
                    return Ok(LadderWin {
                        result,
                        step: step.clone(),
                        index,
                    });
                }
                info!(
                    "Escalation step {} ({}) insufficient ({} bytes, status {}), continuing",
                    index,
                    step.label,
                    result.content.len(),
                    result.status_code
                );
                events.info(format!(
                    "escalation: step '{}' insufficient, continuing",
                    step.label
                ));
            }
            Err(FetchError::Cancelled) => {
                info!("Escalation cancelled at step {} ({})", index, step.label);
                return Err(FetchError::Cancelled);
            }
            Err(e) => {
                warn!("Escalation step {} ({}) failed: {}", index, step.label, e);
                events.warn(format!("escalation: step '{}' failed: {}", step.label, e));
            }
        }
    }

    Err(FetchError::ExhaustedEscalation)
}

/// Whether the winning step was the ladder's own starting point — in which
/// case a profile would buy nothing and is not written. A `fast+direct` win
/// after a failed proxy step IS persisted so the proxy attempt is skipped
/// next time.
pub fn is_default_win(index: usize, step: &EscalationStep) -> bool {
    index == 0 && step.engine == EngineKind::Fast && step.render_delay_ms == 0
}

/// Build the store record for a winning step.
pub fn profile_for_win(step: &EscalationStep, result: &FetchResult, preset: Option<&str>) -> ProfileInput {
    ProfileInput {
        engine: step.engine,
        render_js: step.render_js,
        render_delay_ms: step.render_delay_ms,
        use_proxy: step.use_proxy,
        preset: preset.map(str::to_string),
        last_status_code: Some(result.status_code),
    }
}

pub struct AutoFetcher<'a> {
    pub engines: EngineContext<'a>,
    pub profiles: &'a ProfileStore,
    pub events: &'a EventLog,
    /// Service drain flag; checked between ladder rungs so shutdown cancels
    /// a walk instead of letting it race the pool teardown.
    pub draining: &'a AtomicBool,
}

impl<'a> AutoFetcher<'a> {
    /// Auto-mode entry point: cached profile → single direct engine call;
    /// otherwise walk the ladder and persist a non-default winner.
    pub async fn fetch(&self, req: &FetchRequest) -> Result<FetchResult, FetchError> {
        let domain = extract_domain(&req.url)?;

        if let Some(profile) = self
            .profiles
            .get(&domain)
            .await
            .map_err(FetchError::Engine)?
        {
            return self.fetch_cached(req, &domain, &profile).await;
        }

        let steps = build_ladder(self.engines.config);
        self.events.info(format!(
            "escalation: no profile for {}, walking {} steps",
            domain,
            steps.len()
        ));

        let win = walk_ladder(
            &steps,
            |_, step| {
                let call = self.call_for_step(req, &step);
                async move {
                    if self.draining.load(Ordering::SeqCst) {
                        return Err(FetchError::Cancelled);
                    }
                    dispatch(&self.engines, step.engine, &call).await
                }
            },
            self.events,
        )
        .await?;

        if is_default_win(win.index, &win.step) {
            info!("Domain {}: default step won, nothing persisted", domain);
        } else {
            let input = profile_for_win(&win.step, &win.result, req.preset.as_deref());
            self.profiles
                .upsert(&domain, &input)
                .await
                .map_err(FetchError::Engine)?;
            self.events.info(format!(
                "escalation: cached '{}' for {}",
                win.step.label, domain
            ));
        }

        Ok(win.result)
    }

    /// Execute the remembered step directly. Failures surface unchanged —
    /// re-escalating would hide a degraded profile from operators, who can
    /// evict it via the admin API instead.
    async fn fetch_cached(
        &self,
        req: &FetchRequest,
        domain: &str,
        profile: &crate::core::types::DomainProfile,
    ) -> Result<FetchResult, FetchError> {
        info!(
            "Domain {}: cached profile hit ({}, {} hits)",
            domain,
            profile.engine.as_str(),
            profile.hit_count
        );

        let call = EngineCall {
            url: &req.url,
            headers: &req.headers,
            preset: profile.preset.as_deref().or(req.preset.as_deref()),
            response_type: req.response_type,
            render_delay_ms: profile.render_delay_ms.max(req.render_delay_ms),
            wait_for_js: req.wait_for_js,
            use_proxy: profile.use_proxy,
            proxy_override: req.proxy.as_deref(),
        };

        let outcome = dispatch(&self.engines, profile.engine, &call).await;

        let status = outcome.as_ref().ok().map(|r| r.status_code);
        self.profiles
            .increment_hit(domain, status)
            .await
            .map_err(FetchError::Engine)?;

        outcome
    }

    fn call_for_step<'r>(&self, req: &'r FetchRequest, step: &EscalationStep) -> EngineCall<'r> {
        EngineCall {
            url: &req.url,
            headers: &req.headers,
            preset: req.preset.as_deref(),
            response_type: req.response_type,
            render_delay_ms: step.render_delay_ms.max(req.render_delay_ms),
            wait_for_js: req.wait_for_js,
            use_proxy: step.use_proxy,
            proxy_override: req.proxy.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(proxy: bool, remote: bool) -> ServiceConfig {
        ServiceConfig {
            proxy_url: proxy.then(|| "http://proxy:8080".to_string()),
            browserless_url: remote.then(|| "ws://browser:3000".to_string()),
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn full_config_yields_six_steps_in_order() {
        let steps = build_ladder(&cfg(true, true));
        let labels: Vec<&str> = steps.iter().map(|s| s.label).collect();
        assert_eq!(
            labels,
            vec![
                "fast+proxy",
                "fast+direct",
                "browser+2s",
                "stealth+3s",
                "stealth+5s",
                "unblock"
            ]
        );
        assert_eq!(steps[2].render_delay_ms, 2000);
        assert_eq!(steps[3].render_delay_ms, 3000);
        assert_eq!(steps[4].render_delay_ms, 5000);
    }

    #[test]
    fn no_proxy_drops_first_step() {
        let steps = build_ladder(&cfg(false, true));
        assert_eq!(steps[0].label, "fast+direct");
        assert_eq!(steps.len(), 5);
    }

    #[test]
    fn no_remote_endpoint_leaves_fast_and_stealth() {
        let steps = build_ladder(&cfg(true, false));
        let labels: Vec<&str> = steps.iter().map(|s| s.label).collect();
        assert_eq!(labels, vec!["fast+proxy", "fast+direct", "stealth+3s"]);
    }

    #[test]
    fn default_win_rule() {
        let with_proxy = build_ladder(&cfg(true, true));
        // Step 0 (fast+proxy) winning is the implicit default.
        assert!(is_default_win(0, &with_proxy[0]));
        // fast+direct at index 1 is persisted: it shortcuts the proxy step.
        assert!(!is_default_win(1, &with_proxy[1]));

        let without_proxy = build_ladder(&cfg(false, true));
        // Without a proxy, fast+direct IS the ladder's starting point.
        assert!(is_default_win(0, &without_proxy[0]));
    }
}
