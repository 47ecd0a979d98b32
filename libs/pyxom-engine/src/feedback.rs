/// Feedback Trigger Engine
///
/// **Responsibility:**
/// Decide which authored hints and pitfalls apply to a finished attempt.
///
/// **Selection Rules:**
/// - Conditions are evaluated against the attempt only, never the source
/// - Items without a condition are treated as `OnRequest`
/// - At most `max_auto` automatically triggered hints, in authoring order
/// - `OnRequest` hints appear only when the student asked, and are not capped
/// - Pitfalls are never capped
///
/// **Error Explanations:**
/// Every distinct error kind in the attempt (test errors first, then the
/// rejection) maps to one built-in explanation from `ERROR_PATTERNS`, in
/// first-occurrence order. Kinds without an entry are skipped.

use pyxom_common::types::{AttemptResult, CommonPitfall, ErrorExplanation, FeedbackCondition, Hint, TestCaseRef};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackSelection {
    pub hints: Vec<Hint>,
    pub pitfalls: Vec<CommonPitfall>,
}

static ON_REQUEST: FeedbackCondition = FeedbackCondition::OnRequest;

/// Whether `condition` holds for `attempt`
pub fn condition_met(condition: &FeedbackCondition, attempt: &AttemptResult, requested: bool) -> bool {
    match condition {
        FeedbackCondition::OnAnyFailure => !attempt.overall_passed,
        FeedbackCondition::OnAllTestsFailed => {
            attempt.tests_passed_count == 0 && (attempt.total_tests > 0 || attempt.was_rejected())
        }
        FeedbackCondition::OnRequest => requested,
        FeedbackCondition::ErrorType(kind) => {
            let in_tests = attempt
                .test_run_results
                .iter()
                .any(|r| r.error_kind.as_deref() == Some(kind.as_str()));
            let in_rejection = attempt.rejection.as_ref().map_or(false, |r| r.kind == *kind);
            in_tests || in_rejection
        }
        FeedbackCondition::StaticCheckFailed(id) => attempt
            .static_check_run_results
            .iter()
            .any(|r| r.check.id == *id && !r.passed),
        FeedbackCondition::TestCaseFailed(TestCaseRef::Index(index)) => attempt
            .test_run_results
            .get(*index)
            .map_or(false, |r| !r.passed),
        FeedbackCondition::TestCaseFailed(TestCaseRef::Name(name)) => attempt
            .test_run_results
            .iter()
            .any(|r| r.test_case.name.as_deref() == Some(name.as_str()) && !r.passed),
    }
}

pub fn select_feedback(
    hints: &[Hint],
    pitfalls: &[CommonPitfall],
    attempt: &AttemptResult,
    requested: bool,
    max_auto: usize,
) -> FeedbackSelection {
    let mut selected_hints = Vec::new();
    let mut automatic = 0usize;

    for hint in hints {
        let condition = hint.condition.as_ref().unwrap_or(&ON_REQUEST);
        if !condition_met(condition, attempt, requested) {
            continue;
        }
        if *condition != FeedbackCondition::OnRequest {
            if automatic >= max_auto {
                continue;
            }
            automatic += 1;
        }
        selected_hints.push(hint.clone());
    }

    let selected_pitfalls = pitfalls
        .iter()
        .filter(|p| condition_met(p.condition.as_ref().unwrap_or(&ON_REQUEST), attempt, requested))
        .cloned()
        .collect();

    FeedbackSelection {
        hints: selected_hints,
        pitfalls: selected_pitfalls,
    }
}

/// Built-in explanation for one error class
#[derive(Debug)]
pub struct ErrorPattern {
    pub kind: &'static str,
    pub title: &'static str,
    pub explanation: &'static str,
    pub suggestions: &'static [&'static str],
}

impl ErrorPattern {
    fn to_explanation(&self) -> ErrorExplanation {
        ErrorExplanation {
            kind: self.kind.to_string(),
            title: self.title.to_string(),
            explanation: self.explanation.to_string(),
            suggestions: self.suggestions.iter().map(|s| s.to_string()).collect(),
        }
    }
}

pub static ERROR_PATTERNS: &[ErrorPattern] = &[
    ErrorPattern {
        kind: "SyntaxError",
        title: "Error de Sintaxis",
        explanation: "Hay un error en la estructura del código que impide que Python lo entienda.",
        suggestions: &[
            "Revisa si faltan paréntesis, comillas o dos puntos",
            "Verifica que las comillas estén balanceadas",
            "Asegúrate de que todos los paréntesis estén cerrados",
        ],
    },
    ErrorPattern {
        kind: "IndentationError",
        title: "Error de Indentación",
        explanation: "Python usa la indentación para organizar el código. Todas las líneas de un bloque deben tener la misma indentación.",
        suggestions: &[
            "Usa 4 espacios para cada nivel de indentación",
            "Verifica que después de \":\" haya un bloque indentado",
        ],
    },
    ErrorPattern {
        kind: "NameError",
        title: "Variable No Definida",
        explanation: "Estás intentando usar una variable que no existe o que tiene un error de escritura.",
        suggestions: &[
            "Verifica que hayas declarado la variable antes de usarla",
            "Revisa si hay errores de escritura en el nombre",
            "Python distingue mayúsculas: \"Variable\" no es \"variable\"",
        ],
    },
    ErrorPattern {
        kind: "TypeError",
        title: "Error de Tipo de Datos",
        explanation: "Estás intentando una operación que no es válida para el tipo de datos que estás usando.",
        suggestions: &[
            "Recuerda que input() siempre devuelve texto",
            "Usa int() o str() para convertir entre tipos",
            "Usa f-strings para combinar números y texto",
        ],
    },
    ErrorPattern {
        kind: "ValueError",
        title: "Valor Inválido",
        explanation: "Estás tratando de convertir un texto a número, pero el texto no es un número válido.",
        suggestions: &[
            "Asegúrate de que el texto contenga solo dígitos",
            "Comprueba que lees la línea de entrada correcta",
        ],
    },
    ErrorPattern {
        kind: "ZeroDivisionError",
        title: "División por Cero",
        explanation: "Estás dividiendo un número entre cero, lo cual no está definido.",
        suggestions: &["Verifica que el divisor no sea cero antes de hacer la división"],
    },
    ErrorPattern {
        kind: "IndexError",
        title: "Índice Fuera de Rango",
        explanation: "Estás tratando de acceder a una posición de la lista que no existe.",
        suggestions: &["Verifica que el índice sea menor que len(lista) y mayor o igual a 0"],
    },
    ErrorPattern {
        kind: "KeyError",
        title: "Clave Inexistente",
        explanation: "Estás tratando de acceder a una clave que no existe en el diccionario.",
        suggestions: &["Comprueba la clave con 'clave in diccionario' o usa dict.get()"],
    },
    ErrorPattern {
        kind: "AttributeError",
        title: "Atributo Inexistente",
        explanation: "El objeto no tiene el método o atributo que intentas usar.",
        suggestions: &[
            "Revisa el nombre del método",
            "Comprueba el tipo del objeto con type()",
        ],
    },
    ErrorPattern {
        kind: "EOFError",
        title: "Entrada Agotada",
        explanation: "Tu programa pidió más líneas con input() de las que tiene la entrada.",
        suggestions: &["Lee exactamente tantas líneas como indica el enunciado"],
    },
    ErrorPattern {
        kind: "RecursionError",
        title: "Recursión Demasiado Profunda",
        explanation: "Una función se llama a sí misma sin llegar nunca a un caso base.",
        suggestions: &["Asegúrate de que cada llamada recursiva se acerque al caso base"],
    },
    ErrorPattern {
        kind: "ExecutionTimeout",
        title: "Tiempo de Ejecución Agotado",
        explanation: "Tu código tardó demasiado en ejecutarse y fue detenido automáticamente.",
        suggestions: &[
            "Verifica que tus bucles while tengan una condición que llegue a ser falsa",
            "Evita recorrer rangos enormes",
        ],
    },
    ErrorPattern {
        kind: "SecurityViolation",
        title: "Código Bloqueado por Seguridad",
        explanation: "Tu código usa un módulo, función o bucle que no está permitido en este entorno.",
        suggestions: &["Usa solo los módulos y funciones básicas de Python"],
    },
];

/// Built-in explanation for `kind`, if there is one
pub fn explain_error(kind: &str) -> Option<ErrorExplanation> {
    ERROR_PATTERNS
        .iter()
        .find(|p| p.kind == kind)
        .map(ErrorPattern::to_explanation)
}

/// One explanation per distinct error kind in `attempt`
pub fn explain_errors(attempt: &AttemptResult) -> Vec<ErrorExplanation> {
    let kinds = attempt
        .test_run_results
        .iter()
        .filter_map(|r| r.error_kind.as_deref())
        .chain(attempt.rejection.as_ref().map(|r| r.kind.as_str()));

    let mut seen: Vec<&str> = Vec::new();
    let mut explanations = Vec::new();
    for kind in kinds {
        if seen.contains(&kind) {
            continue;
        }
        seen.push(kind);
        if let Some(explanation) = explain_error(kind) {
            explanations.push(explanation);
        }
    }
    explanations
}
