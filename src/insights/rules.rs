//! Rule-based retention insights
//!
//! Deterministic rules over the customer record and the primary prediction.
//! Always available; the generator falls back to it when every generative
//! strategy fails.

use super::{InsightRequest, InsightSections, InsightStrategy, StrategyOutput};
use crate::error::StrategyError;
use crate::types::assessment::RiskLevel;
use crate::types::customer::CustomerRecord;
use async_trait::async_trait;

pub const RULE_BASED: &str = "rule_based";

// Values assumed for fields the record does not carry
const DEFAULT_AGE: f64 = 30.0;
const DEFAULT_CREDIT_SCORE: f64 = 650.0;
const DEFAULT_DEPOSITS: f64 = 5.0;
const DEFAULT_PURCHASES: f64 = 25.0;
const DEFAULT_REWARDS: f64 = 100.0;
const DEFAULT_APP_DOWNLOADED: f64 = 1.0;

const NO_KEY_INSIGHTS: &str = "Perfil del cliente analizado para oportunidades de retención";

#[derive(Default)]
struct Sections {
    recommendations: Vec<&'static str>,
    key_insights: Vec<&'static str>,
    action_items: Vec<&'static str>,
}

impl Sections {
    fn rec(&mut self, text: &'static str) {
        self.recommendations.push(text);
    }

    fn insight(&mut self, text: &'static str) {
        self.key_insights.push(text);
    }

    fn action(&mut self, text: &'static str) {
        self.action_items.push(text);
    }
}

fn bullets(items: &[&str]) -> String {
    items
        .iter()
        .map(|item| format!("• {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Apply the retention rules. Pure function of its inputs.
pub fn rule_based_sections(
    record: &CustomerRecord,
    risk_level: RiskLevel,
    probability: f64,
) -> InsightSections {
    let mut s = Sections::default();

    match risk_level {
        RiskLevel::High => {
            s.rec("🚨 ALTA PRIORIDAD: Se requiere intervención inmediata");
            s.action("Programar llamada personal dentro de 24 horas");
            s.action("Ofrecer soporte premium o gerente de cuenta");
        }
        RiskLevel::Medium => {
            s.rec("⚠️ PRIORIDAD MEDIA: Se necesita compromiso proactivo");
            s.action("Enviar oferta de retención personalizada");
        }
        RiskLevel::Low => {
            s.rec("✅ RIESGO BAJO: Enfocarse en compromiso y satisfacción");
        }
    }

    if record.number_or("app_downloaded", DEFAULT_APP_DOWNLOADED) == 0.0 {
        s.rec("📱 Fomentar adopción de app móvil con incentivos");
        s.action("Enviar oferta de bonificación por descarga de app");
    }

    if record.flag("left_for_one_month") || record.flag("left_for_two_month_plus") {
        s.insight("El cliente muestra patrones de inactividad - re-compromiso crítico");
        s.rec("🔄 Implementar campaña de reconquista");
        s.action("Enviar email 'Te extrañamos' con ofertas especiales");
    }

    let credit_score = record.number_or("credit_score", DEFAULT_CREDIT_SCORE);
    if credit_score < 600.0 {
        s.rec("💳 Ofrecer recursos y herramientas de mejora crediticia");
        s.action("Proporcionar contenido de bienestar financiero");
    } else if credit_score > 750.0 {
        s.rec("⭐ Ofrecer productos y servicios premium");
        s.action("Presentar oportunidades de inversión exclusivas");
    }

    if record.number_or("deposits", DEFAULT_DEPOSITS) < 3.0 {
        s.insight("Baja actividad de depósitos indica compromiso limitado");
        s.rec("💰 Fomentar configuración de depósito directo con incentivos");
        s.action("Ofrecer bonificación por depósito directo");
    }

    if record.number_or("purchases", DEFAULT_PURCHASES) < 10.0 {
        s.rec("🛒 Promover recompensas de gastos y programas de cashback");
        s.action("Enviar ofertas de comerciantes dirigidas");
    }

    if record.flag("cc_disliked") {
        s.insight("El cliente tiene sentimiento negativo hacia productos de crédito");
        s.rec("🤝 Enfocarse en construir confianza a través de educación");
        s.action("Compartir contenido educativo sobre crédito");
    } else if !record.flag("cc_taken") && credit_score > 650.0 {
        s.rec("💳 Presentar ofertas de tarjeta de crédito personalizadas");
        s.action("Enviar invitación de tarjeta de crédito pre-aprobada");
    }

    if record.flag("rejected_loan") {
        s.insight("Rechazo previo de préstamo puede indicar frustración");
        s.rec("🏦 Ofrecer productos de préstamo alternativos o asesoría financiera");
        s.action("Proporcionar consejos de mejora de préstamos");
    } else if record.flag("received_loan") {
        s.insight("Cliente exitoso de préstamo - relación de alto valor");
        s.rec("🎯 Venta cruzada de productos financieros adicionales");
    }

    let rewards = record.number_or("rewards_earned", DEFAULT_REWARDS);
    if rewards < 50.0 {
        s.rec("🎁 Educar sobre beneficios del programa de recompensas");
        s.action("Enviar tutorial del programa de recompensas");
    } else if rewards > 500.0 {
        s.insight("Alto ganador de recompensas - cliente comprometido");
        s.rec("🏆 Ofrecer estatus VIP o beneficios exclusivos");
    }

    if record.flag("is_referred") {
        s.insight("Cliente referido - probablemente mayor valor de por vida");
        s.rec("👥 Aprovechar red de referidos para retención");
    }

    let age = record.number_or("age", DEFAULT_AGE);
    if age < 30.0 {
        s.rec("🎓 Ofrecer productos financieros para estudiantes/jóvenes profesionales");
        s.action("Presentar herramientas de presupuesto y ahorro");
    } else if age > 50.0 {
        s.rec("🏡 Enfocarse en planificación de jubilación e inversiones");
        s.action("Programar consulta de planificación financiera");
    }

    if s.key_insights.is_empty() {
        s.insight(NO_KEY_INSIGHTS);
    }

    let focus = match risk_level {
        RiskLevel::High => "intervención inmediata y soporte premium",
        RiskLevel::Medium => "compromiso proactivo y ofertas personalizadas",
        RiskLevel::Low => "mantener satisfacción y aumentar compromiso",
    };
    let strategy = format!(
        "Estrategia de retención: basado en el riesgo de abandono {} ({:.1}% de probabilidad), enfocarse en {focus}.",
        risk_label(risk_level),
        probability * 100.0
    );

    let action_items = if s.action_items.is_empty() {
        "• Mantener seguimiento regular del cliente".to_string()
    } else {
        bullets(&s.action_items)
    };

    InsightSections {
        recommendations: format!("{}\n\n{strategy}", bullets(&s.recommendations)),
        key_insights: bullets(&s.key_insights),
        action_items,
    }
}

fn risk_label(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::High => "alto",
        RiskLevel::Medium => "medio",
        RiskLevel::Low => "bajo",
    }
}

/// Strategy wrapper around [`rule_based_sections`]
#[derive(Debug, Default, Clone)]
pub struct RuleBasedStrategy;

#[async_trait]
impl InsightStrategy for RuleBasedStrategy {
    fn name(&self) -> &str {
        RULE_BASED
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn generate(&self, request: &InsightRequest) -> Result<StrategyOutput, StrategyError> {
        Ok(StrategyOutput::Structured(rule_based_sections(
            &request.record,
            request.prediction.risk_level,
            request.prediction.probability,
        )))
    }
}
