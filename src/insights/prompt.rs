//! Prompt construction for generative strategies

use super::InsightRequest;
use crate::types::assessment::RiskLevel;
use crate::types::customer::CustomerRecord;
use std::fmt::Write;

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "Sí"
    } else {
        "No"
    }
}

fn housing_text(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "o" | "own" => "propia".to_string(),
        "r" | "rent" => "alquilada".to_string(),
        "mortgage" => "hipotecada".to_string(),
        "" | "na" => "no especificada".to_string(),
        _ => raw.to_string(),
    }
}

fn payment_text(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "monthly" => "mensual".to_string(),
        "bi-weekly" => "quincenal".to_string(),
        "weekly" => "semanal".to_string(),
        "semi-monthly" => "bimensual".to_string(),
        "" | "na" => "no especificado".to_string(),
        _ => raw.to_string(),
    }
}

fn bullet_list(items: &[&str], empty: &str) -> String {
    if items.is_empty() {
        format!("• {empty}")
    } else {
        items
            .iter()
            .map(|i| format!("• {i}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Customer profile in the layout generative strategies expect
pub fn customer_profile(record: &CustomerRecord) -> String {
    let n = |name: &str| record.number_or(name, 0.0);
    let f = |name: &str| record.flag(name);

    let total_transactions =
        n("deposits") + n("withdrawal") + n("purchases") + n("purchases_partners");
    let digital_score = ["app_downloaded", "web_user", "app_web_user", "ios_user", "android_user"]
        .into_iter()
        .filter(|&name| f(name))
        .count();

    let activity_level = if total_transactions > 30.0 {
        "Alta"
    } else if total_transactions > 15.0 {
        "Media"
    } else {
        "Baja"
    };
    let digital_adoption = match digital_score {
        s if s >= 3 => "Completa",
        s if s >= 1 => "Parcial",
        _ => "Limitada",
    };

    let mut risk_indicators = Vec::new();
    if f("left_for_one_month") {
        risk_indicators.push("Inactivo por 1 mes");
    }
    if f("left_for_two_month_plus") {
        risk_indicators.push("Inactivo por 2+ meses");
    }
    if f("cancelled_loan") {
        risk_indicators.push("Préstamo cancelado");
    }
    if f("rejected_loan") {
        risk_indicators.push("Préstamo rechazado");
    }
    if f("cc_disliked") {
        risk_indicators.push("Sentimiento negativo hacia tarjeta de crédito");
    }

    let mut opportunities = Vec::new();
    if !f("app_downloaded") {
        opportunities.push("Adopción de app móvil");
    }
    if !f("cc_taken") && n("credit_score") > 650.0 {
        opportunities.push("Oferta de tarjeta de crédito");
    }
    if f("waiting_4_loan") {
        opportunities.push("Procesamiento de préstamo pendiente");
    }
    if n("rewards_earned") < 100.0 {
        opportunities.push("Activación del programa de recompensas");
    }
    if f("is_referred") {
        opportunities.push("Aprovechamiento de red de referidos");
    }

    let cc_sentiment = if f("cc_liked") {
        "Positivo"
    } else if f("cc_disliked") {
        "Negativo"
    } else {
        "Neutral"
    };
    let loan_status = if f("received_loan") {
        "Recibido"
    } else if f("rejected_loan") {
        "Rechazado"
    } else if f("waiting_4_loan") {
        "Esperando"
    } else if f("cancelled_loan") {
        "Cancelado"
    } else {
        "Sin actividad"
    };

    let housing = housing_text(&record.text("housing").unwrap_or_default());
    let payment = payment_text(&record.text("payment_type").unwrap_or_default());

    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write!(
        out,
        "INFORMACIÓN DEMOGRÁFICA:
• Edad: {age:.0} años
• Vivienda: {housing}
• Tipo de pago preferido: {payment}
• Puntaje crediticio: {credit:.0}/850

ACTIVIDAD FINANCIERA:
• Nivel de actividad general: {activity_level} ({total_transactions:.0} transacciones totales)
• Depósitos realizados: {deposits:.0}
• Retiros realizados: {withdrawal:.0}
• Compras totales: {purchases:.0}
• Compras con socios: {partners:.0}
• Teléfonos registrados: {phones:.0}

PRODUCTOS Y SERVICIOS:
• Tarjeta de crédito: {cc}
• Sentimiento hacia TC: {cc_sentiment}
• Recomendación de TC: {cc_rec}
• Aplicación de TC iniciada: {cc_app}
• Estado de préstamo: {loan_status}

ENGAGEMENT DIGITAL:
• Adopción digital: {digital_adoption} (Score: {digital_score}/5)
• App descargada: {app}
• Usuario web: {web}
• Usuario app+web: {app_web}
• Plataforma iOS: {ios}
• Plataforma Android: {android}

PROGRAMA DE RECOMPENSAS:
• Puntos ganados: {rewards:.0}
• Tasa de recompensa: {reward_rate:.2}%
• Cliente referido: {referred}

INDICADORES DE RIESGO:
{risk}

OPORTUNIDADES IDENTIFICADAS:
{opps}
",
        age = n("age"),
        credit = n("credit_score"),
        deposits = n("deposits"),
        withdrawal = n("withdrawal"),
        purchases = n("purchases"),
        partners = n("purchases_partners"),
        phones = n("registered_phones"),
        cc = if f("cc_taken") { "Activa" } else { "No tomada" },
        cc_rec = if f("cc_recommended") { "Recibida" } else { "No recibida" },
        cc_app = yes_no(f("cc_application_begin")),
        app = yes_no(f("app_downloaded")),
        web = yes_no(f("web_user")),
        app_web = yes_no(f("app_web_user")),
        ios = yes_no(f("ios_user")),
        android = yes_no(f("android_user")),
        rewards = n("rewards_earned"),
        reward_rate = n("reward_rate") * 100.0,
        referred = yes_no(f("is_referred")),
        risk = bullet_list(&risk_indicators, "Ningún indicador de riesgo crítico identificado"),
        opps = bullet_list(&opportunities, "Cliente con perfil estable, enfocarse en satisfacción"),
    );
    out
}

/// Full instruction prompt for one customer
pub fn build_prompt(request: &InsightRequest) -> String {
    let profile = customer_profile(&request.record);
    let prediction = &request.prediction;

    let mut drivers = String::new();
    if let Some(attribution) = &request.attribution {
        drivers.push_str("\nFACTORES PRINCIPALES DEL MODELO:\n");
        for entry in attribution.top(5) {
            let direction = if entry.contribution >= 0.0 {
                "aumenta"
            } else {
                "reduce"
            };
            let _ = writeln!(
                drivers,
                "• {}: {direction} el riesgo ({:+.3})",
                entry.feature, entry.contribution
            );
        }
    }

    let risk = match prediction.risk_level {
        RiskLevel::High => "High",
        RiskLevel::Medium => "Medium",
        RiskLevel::Low => "Low",
    };

    format!(
        "Eres un experto analista de retención de clientes fintech con más de 10 años de experiencia. \
Analiza el siguiente perfil completo del cliente y proporciona insights accionables y específicos para prevenir el abandono.

PERFIL COMPLETO DEL CLIENTE:
{profile}
RIESGO DE ABANDONO: {risk} (Probabilidad: {probability:.1}%)
{drivers}
INSTRUCCIONES ESPECÍFICAS:
Responde con exactamente tres secciones, separadas por una línea en blanco y con estos encabezados:

INSIGHTS CLAVE:
(3-4 puntos principales sobre el comportamiento del cliente, fortalezas, debilidades y factores de riesgo)

RECOMENDACIONES:
(4-5 recomendaciones priorizadas con su justificación)

ACCIONES INMEDIATAS:
(3-4 acciones para las próximas 48 horas, con responsables y métricas de éxito)

CONTEXTO IMPORTANTE:
- Enfócate en soluciones prácticas y personalizadas
- Considera el nivel de riesgo actual del cliente
- Basa las recomendaciones en datos específicos del perfil
- Mantén un tono profesional pero empático

Responde en español.",
        probability = prediction.probability * 100.0,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::assessment::ModelPrediction;
    use serde_json::json;

    fn request(record: serde_json::Value) -> InsightRequest {
        InsightRequest {
            record: serde_json::from_value(record).unwrap(),
            prediction: ModelPrediction {
                model: "XGB".to_string(),
                probability: 0.734,
                prediction: 1,
                risk_level: RiskLevel::High,
            },
            attribution: None,
        }
    }

    #[test]
    fn test_profile_derived_metrics() {
        let r: CustomerRecord = serde_json::from_value(json!({
            "age": 41,
            "housing": "r",
            "payment_type": "monthly",
            "deposits": 10,
            "withdrawal": 5,
            "purchases": 12,
            "purchases_partners": 8,
            "app_downloaded": 1,
            "web_user": 1,
            "ios_user": 1,
            "left_for_one_month": 1
        }))
        .unwrap();
        let profile = customer_profile(&r);

        assert!(profile.contains("• Vivienda: alquilada"));
        assert!(profile.contains("• Tipo de pago preferido: mensual"));
        assert!(profile.contains("Alta (35 transacciones totales)"));
        assert!(profile.contains("Completa (Score: 3/5)"));
        assert!(profile.contains("• Inactivo por 1 mes"));
    }

    #[test]
    fn test_prompt_mentions_risk_and_headers() {
        let prompt = build_prompt(&request(json!({"age": 30})));
        assert!(prompt.contains("RIESGO DE ABANDONO: High (Probabilidad: 73.4%)"));
        assert!(prompt.contains("RECOMENDACIONES:"));
        assert!(prompt.contains("ACCIONES INMEDIATAS:"));
        assert!(!prompt.contains("FACTORES PRINCIPALES"));
    }
}
