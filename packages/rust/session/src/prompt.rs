//! Prompt templates and rendering.
//!
//! Templates are Portuguese instruction blocks demanding JSON-only output
//! with `pergunta`/`resposta` keys, framed around a context section. One
//! template per feeder flavor: generation (raw document chunks) and
//! refinement (expanding prior QA rows).

use qaforge_corpus::document_stem;
use qaforge_shared::{ContextUnit, Payload};

const CONTEXT_HEADER: &str = "--------- CONTEXTO ---------";
const CONTEXT_FOOTER: &str = "--------- FIM DE CONTEXTO ---------";

const GENERATION_INSTRUCTION: &str = "\
--------- INSTRUÇÃO SISTEMA ---------
Você é um gerador de perguntas e respostas que se comunica apenas usando o \
FORMATO JSON. Você é treinado para gerar 3 perguntas e as respectivas \
respostas que ESTEJAM CONTIDAS no CONTEXTO RECEBIDO. Gere a saída APENAS no \
formato JSON. NÃO GERE perguntas e respostas que NÃO estejam contidas no \
CONTEXTO. NÃO GERE perguntas e respostas sobre valores de multas. O conteúdo \
das perguntas e respostas PRECISA ser ENCONTRADO NO CONTEXTO. Gere respostas \
DETALHADAS e PRECISAS.
A saída esperada, em JSON, deve ser no formato:
{
  \"pergunta\": \"{pergunta}\",
  \"resposta\": \"{resposta}\"
}
--------- FIM DE INSTRUÇÃO SISTEMA ---------";

const GENERATION_POST_PROMPT: &str = "\
A saída esperada, em JSON, deve ser no formato:
[{
  \"pergunta\": \"{pergunta1}\",
  \"resposta\": \"{resposta1}\"
},
{
  \"pergunta\": \"{pergunta2}\",
  \"resposta\": \"{resposta2}\"
},
{
  \"pergunta\": \"{pergunta3}\",
  \"resposta\": \"{resposta3}\"
}]

Lembre-se de especificar o nome do documento nas perguntas (quando \
necessário) e respostas.";

const REFINEMENT_INSTRUCTION: &str = "\
--------- INSTRUÇÃO SISTEMA ---------
Você é um revisor de perguntas e respostas que se comunica apenas usando o \
FORMATO JSON. Dada uma pergunta e uma resposta existentes sobre o CONTEXTO \
RECEBIDO, reescreva a pergunta com mais clareza e produza uma resposta \
LONGA, DETALHADA e PRECISA, baseada somente no contexto. Gere a saída APENAS \
no formato JSON.
A saída esperada, em JSON, deve ser no formato:
{
  \"pergunta\": \"{nova pergunta}\",
  \"resposta\": \"{nova resposta longa}\"
}
--------- FIM DE INSTRUÇÃO SISTEMA ---------";

/// A rendered instruction + context, ready to submit. Ephemeral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptEnvelope {
    pub text: String,
}

/// Which instruction block to render around a unit's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptTemplate {
    /// Generate new QA pairs from a document chunk.
    Generation,
    /// Expand an existing QA row into a long-form answer.
    Refinement,
}

impl PromptTemplate {
    /// Render the full prompt for one unit. The payload picks the framing;
    /// a flavor/payload mismatch renders whatever the payload supports.
    pub fn render(&self, unit: &ContextUnit) -> PromptEnvelope {
        let text = match &unit.payload {
            Payload::Document { text } => render_generation(&unit.source_name, text),
            Payload::QaRow {
                prompt,
                question,
                answer,
            } => render_refinement(prompt, question, answer),
        };

        PromptEnvelope { text }
    }
}

fn render_generation(source_name: &str, text: &str) -> String {
    format!(
        "{GENERATION_INSTRUCTION}\n{CONTEXT_HEADER}\n{}\n\n{text}\n{CONTEXT_FOOTER}\n{GENERATION_POST_PROMPT}",
        document_stem(source_name),
    )
}

fn render_refinement(prompt: &str, question: &str, answer: &str) -> String {
    format!(
        "{REFINEMENT_INSTRUCTION}\n{CONTEXT_HEADER}\n{prompt}\n{CONTEXT_FOOTER}\n\
         Pergunta original: {question}\nResposta original: {answer}",
    )
}
