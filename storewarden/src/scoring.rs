// storewarden/src/scoring.rs
//
// Pure risk scoring. The authoritative magnitude is the provider's single
// aggregate suspicion score; boolean detector slots never move the score and
// are recorded as contextual factors only, so "why flagged" stays decoupled
// from "how much".
//
// Fixed factor severities:
//   Bot Detected        critical
//   Tor Network         critical
//   Browser Tampering   critical
//   VPN Detected        high
//   Proxy Detected      high
//   Datacenter IP       high
//   Virtual Machine     high
//   Cloned App          high
//   Emulator            high
//   Rooted Device       high
//   Rapid Browsing      high    (>10 page visits in 5 minutes)
//   Fast Browsing       medium  (>5 page visits in 5 minutes)
//   Incognito Mode      medium
//   High Activity       medium
//   Developer Tools     high

use crate::events::{BotVerdict, ClientSignals, RiskAnalysis, RiskFactor, RiskLevel, SignalBundle};

// Provider suspicion score arrives on its raw 0–20 scale.
pub const SUSPECT_RAW_MAX: u32 = 20;
const SUSPECT_SCALE: u32 = 100 / SUSPECT_RAW_MAX;

// Fallback contribution from client signals when the provider score is absent.
const DEVTOOLS_POINTS: u8 = 20;

// Level thresholds on the final 0–100 score, inclusive at the lower edge.
pub const CRITICAL_AT: u8 = 60;
pub const HIGH_AT: u8 = 40;
pub const MEDIUM_AT: u8 = 20;

pub fn level_for(score: u8) -> RiskLevel {
    if score >= CRITICAL_AT {
        RiskLevel::Critical
    } else if score >= HIGH_AT {
        RiskLevel::High
    } else if score >= MEDIUM_AT {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Score one visit. Deterministic and side-effect free: identical inputs
/// always produce identical output, which the visitor aggregator's
/// keep-only-if-improves merge relies on under retries.
pub fn analyze(server: Option<&SignalBundle>, client: Option<&ClientSignals>) -> RiskAnalysis {
    let mut factors = Vec::new();

    if let Some(bundle) = server {
        collect_factors(bundle, &mut factors);
    }
    if client.map(|c| c.dev_tools_open).unwrap_or(false) {
        push(
            &mut factors,
            "Developer Tools Open",
            RiskLevel::High,
            "visitor inspecting page source or code".to_string(),
        );
    }

    let suspect = server.and_then(|b| b.suspect_score).map(|s| s.result);
    let score = match suspect {
        Some(raw) => raw.saturating_mul(SUSPECT_SCALE).min(100) as u8,
        None if client.map(|c| c.dev_tools_open).unwrap_or(false) => DEVTOOLS_POINTS,
        None => 0,
    };

    let level = level_for(score);
    RiskAnalysis {
        score,
        level,
        factors,
        recommendation: level.recommendation().to_string(),
    }
}

fn push(factors: &mut Vec<RiskFactor>, signal: &str, severity: RiskLevel, detail: String) {
    factors.push(RiskFactor {
        signal: signal.to_string(),
        severity,
        detail,
    });
}

// Factor extraction in fixed declaration order, so factor lists compare
// equal across retries of the same event.
fn collect_factors(bundle: &SignalBundle, factors: &mut Vec<RiskFactor>) {
    if let Some(bot) = &bundle.bot {
        if bot.result == BotVerdict::Bad {
            let detail = format!("type: {}", bot.bot_type.as_deref().unwrap_or("unknown"));
            push(factors, "Bot Detected", RiskLevel::Critical, detail);
        }
    }

    if let Some(vpn) = &bundle.vpn {
        if vpn.result {
            let detail = match vpn.confidence {
                Some(c) => format!("confidence {:.2}", c),
                None => "confidence unknown".to_string(),
            };
            push(factors, "VPN Detected", RiskLevel::High, detail);
        }
    }

    if let Some(proxy) = &bundle.proxy {
        if proxy.result {
            push(
                factors,
                "Proxy Detected",
                RiskLevel::High,
                "traffic routed through a proxy".to_string(),
            );
        }
    }

    if let Some(tor) = &bundle.tor {
        if tor.result {
            push(
                factors,
                "Tor Network",
                RiskLevel::Critical,
                "visitor using Tor anonymization".to_string(),
            );
        }
    }

    if let Some(dc) = bundle.ip_info.as_ref().and_then(|i| i.datacenter.as_ref()) {
        if dc.result {
            let detail = dc.name.clone().unwrap_or_else(|| "unknown datacenter".to_string());
            push(factors, "Datacenter IP", RiskLevel::High, detail);
        }
    }

    if let Some(inc) = &bundle.incognito {
        if inc.result {
            push(
                factors,
                "Incognito Mode",
                RiskLevel::Medium,
                "private browsing enabled".to_string(),
            );
        }
    }

    if let Some(vm) = &bundle.virtual_machine {
        if vm.result {
            push(
                factors,
                "Virtual Machine",
                RiskLevel::High,
                "running in a VM environment".to_string(),
            );
        }
    }

    if let Some(tamper) = &bundle.tampering {
        if tamper.result {
            let detail = if tamper.anti_detect_browser.unwrap_or(false) {
                "anti-detect browser detected".to_string()
            } else {
                format!("anomaly score {:.2}", tamper.anomaly_score.unwrap_or(0.0))
            };
            push(factors, "Browser Tampering", RiskLevel::Critical, detail);
        }
    }

    if let Some(cloned) = &bundle.cloned_app {
        if cloned.result {
            push(
                factors,
                "Cloned App",
                RiskLevel::High,
                "running a tampered application build".to_string(),
            );
        }
    }

    if let Some(emu) = &bundle.emulator {
        if emu.result {
            push(
                factors,
                "Emulator",
                RiskLevel::High,
                "running in an emulator".to_string(),
            );
        }
    }

    if let Some(rooted) = &bundle.rooted_device {
        if rooted.result {
            push(
                factors,
                "Rooted Device",
                RiskLevel::High,
                "device is rooted or jailbroken".to_string(),
            );
        }
    }

    if let Some(events_5m) = bundle.velocity.and_then(|v| v.events_last_5m) {
        if events_5m > 10 {
            push(
                factors,
                "Rapid Browsing",
                RiskLevel::High,
                format!("{} page visits in 5 minutes", events_5m),
            );
        } else if events_5m > 5 {
            push(
                factors,
                "Fast Browsing",
                RiskLevel::Medium,
                format!("{} page visits in 5 minutes", events_5m),
            );
        }
    }

    if let Some(activity) = &bundle.high_activity {
        if activity.result {
            let detail = match activity.daily_requests {
                Some(n) => format!("{} requests today", n),
                None => "elevated daily request volume".to_string(),
            };
            push(factors, "High Activity", RiskLevel::Medium, detail);
        }
    }
}
