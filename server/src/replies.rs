use minijinja::{context, Environment};

use crate::notifier::{MenuButton, OutboundPayload};

const AUTO_REPLY_TEMPLATE: &str = include_str!("templates/auto_reply.j2");
const MENU_TEMPLATE: &str = include_str!("templates/menu.j2");

pub struct ReplyContext<'a> {
    pub text: &'a str,
    pub new_conversation: bool,
}

fn render(name: &str, source: &str, ctx: &ReplyContext<'_>) -> Option<String> {
    let mut env = Environment::new();
    env.add_template(name, source).ok()?;
    let template = env.get_template(name).ok()?;
    template
        .render(context! {
            text => ctx.text.trim(),
            new_conversation => ctx.new_conversation,
        })
        .ok()
        .map(|rendered| rendered.trim().to_string())
}

pub fn text_reply(ctx: &ReplyContext<'_>) -> OutboundPayload {
    let body = render("auto_reply", AUTO_REPLY_TEMPLATE, ctx).unwrap_or_else(|| {
        format!(
            "Recebemos sua mensagem: \"{}\". Em breve um atendente vai falar com você.",
            ctx.text.trim()
        )
    });
    OutboundPayload::Text { body }
}

pub fn menu_reply(ctx: &ReplyContext<'_>) -> OutboundPayload {
    let body = render("menu", MENU_TEMPLATE, ctx)
        .unwrap_or_else(|| "Escolha uma opção abaixo:".to_string());
    OutboundPayload::Menu {
        body,
        buttons: vec![
            MenuButton::new("orcamento", "Orçamento"),
            MenuButton::new("suporte", "Suporte"),
            MenuButton::new("atendente", "Falar com atendente"),
        ],
    }
}
