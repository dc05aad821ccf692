// Parser for the textual stencil IR.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators. Name resolution and semantic checks happen later in
// `resolve`; this stage only enforces the grammar and operation arity.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics; parsing continues.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::ir::{BinaryOp, UnaryOp};
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub module: Option<ModuleAst>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse a stencil IR source string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    let token_iter = lex_result.tokens.into_iter();
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = module_parser();
    let (module, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| Rich::custom(e.span, e.message))
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    ParseResult {
        module,
        errors: all_errors,
    }
}

// ── Main parser builder ──

fn module_parser<'tokens, I>(
) -> impl Parser<'tokens, I, ModuleAst, extra::Err<Rich<'tokens, Token, SimpleSpan>>>
where
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Names ──

    let ident = select! { Token::Ident(name) = e => Ident { name, span: e.span() } };
    let local = select! { Token::Local(name) = e => Ident { name, span: e.span() } };
    let global = select! { Token::Global(name) = e => Ident { name, span: e.span() } };

    let operand_ref = local
        .clone()
        .map(OperandRef::Temp)
        .or(global.clone().map(OperandRef::Buffer));

    // ── Literals ──

    let int = select! { Token::Int(v) => v };
    let number = select! {
        Token::Float(v) => v,
        Token::Int(v) => v as f64,
    };

    // ── Box: '[' lb ':' ub (',' lb ':' ub)* ']' | 'empty' ──

    let range = int
        .clone()
        .then_ignore(just(Token::Colon))
        .then(int.clone());
    let box_lit = choice((
        just(Token::Empty).map_with(|_, e| BoxLit {
            kind: BoxKind::Empty,
            span: e.span(),
        }),
        range
            .separated_by(just(Token::Comma))
            .at_least(1)
            .collect::<Vec<_>>()
            .delimited_by(just(Token::LBracket), just(Token::RBracket))
            .map_with(|ranges, e| BoxLit {
                kind: BoxKind::Ranges(ranges),
                span: e.span(),
            }),
    ));

    // ── Offset: '[' int (',' int)* ']' ──

    let offset_lit = int
        .clone()
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .delimited_by(just(Token::LBracket), just(Token::RBracket))
        .map_with(|values, e| OffsetLit {
            values,
            span: e.span(),
        });

    let value_list = local.clone().separated_by(just(Token::Comma)).collect::<Vec<_>>();

    // ── Body operations ──

    let access = just(Token::Access)
        .ignore_then(operand_ref.clone())
        .then(offset_lit.clone())
        .map(|(operand, offset)| OpAst::Access { operand, offset });

    let index = just(Token::Index)
        .ignore_then(int.clone().map_with(|dim, e| (dim, e.span())))
        .then(offset_lit.clone())
        .map(|((dim, dim_span), offset)| OpAst::Index {
            dim,
            dim_span,
            offset,
        });

    let constant = just(Token::Const).ignore_then(number).map(OpAst::Const);

    let call = just(Token::Call)
        .ignore_then(just(Token::Impure).or_not())
        .then(ident.clone())
        .then(
            value_list
                .clone()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .map(|((impure, callee), args)| OpAst::Call {
            callee,
            args,
            pure: impure.is_none(),
        });

    // mnemonic %a (, %b)?  -- arity is checked against the mnemonic here
    let arith = ident
        .clone()
        .then(local.clone().separated_by(just(Token::Comma)).at_least(1).collect::<Vec<_>>())
        .try_map(|(mnemonic, args): (Ident, Vec<Ident>), span| {
            if let Some(op) = UnaryOp::from_mnemonic(&mnemonic.name) {
                return match <[Ident; 1]>::try_from(args) {
                    Ok([arg]) => Ok(OpAst::Unary { op, arg }),
                    Err(args) => Err(Rich::custom(
                        span,
                        format!("'{}' takes 1 operand, found {}", mnemonic.name, args.len()),
                    )),
                };
            }
            if let Some(op) = BinaryOp::from_mnemonic(&mnemonic.name) {
                return match <[Ident; 2]>::try_from(args) {
                    Ok([lhs, rhs]) => Ok(OpAst::Binary { op, lhs, rhs }),
                    Err(args) => Err(Rich::custom(
                        span,
                        format!("'{}' takes 2 operands, found {}", mnemonic.name, args.len()),
                    )),
                };
            }
            Err(Rich::custom(
                span,
                format!("unknown operation '{}'", mnemonic.name),
            ))
        });

    let op_stmt = local
        .clone()
        .then_ignore(just(Token::Equals))
        .then(choice((access, index, constant, call, arith)))
        .map_with(|(result, op), e| OpStmt {
            result,
            op,
            span: e.span(),
        });

    // ── Return: 'return' values ('unroll' axis 'by' factor)? ──

    let ret = just(Token::Return)
        .ignore_then(value_list)
        .then(
            just(Token::Unroll)
                .ignore_then(int.clone())
                .then_ignore(just(Token::By))
                .then(int.clone())
                .or_not(),
        )
        .map_with(|(values, unroll), e| ReturnStmt {
            values,
            unroll,
            span: e.span(),
        });

    let body = op_stmt
        .repeated()
        .collect::<Vec<_>>()
        .then(ret)
        .delimited_by(just(Token::LBrace), just(Token::RBrace))
        .map_with(|(stmts, ret), e| BodyAst {
            stmts,
            ret,
            span: e.span(),
        });

    // ── Items ──

    let buffer = just(Token::Buffer)
        .ignore_then(global)
        .then_ignore(just(Token::Colon))
        .then(ident.clone())
        .then(just(Token::Domain).ignore_then(box_lit.clone()).or_not())
        .then(just(Token::Required).ignore_then(box_lit.clone()).or_not())
        .map_with(|(((name, elem), domain), required), e| {
            Item::Buffer(BufferDecl {
                name,
                elem,
                domain,
                required,
                span: e.span(),
            })
        });

    let result_type = ident
        .clone()
        .then(box_lit.clone().or_not())
        .map(|(elem, shape)| ResultType { elem, shape });

    let apply = local
        .clone()
        .separated_by(just(Token::Comma))
        .at_least(1)
        .collect::<Vec<_>>()
        .then_ignore(just(Token::Equals))
        .then_ignore(just(Token::Apply))
        .then(ident.clone())
        .then(
            operand_ref
                .separated_by(just(Token::Comma))
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LParen), just(Token::RParen)),
        )
        .then_ignore(just(Token::Arrow))
        .then(
            result_type
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>(),
        )
        .then(just(Token::Over).ignore_then(box_lit.clone()).or_not())
        .then(body.clone())
        .then(just(Token::Epilogue).ignore_then(body).or_not())
        .map_with(
            |((((((results, name), operands), result_types), over), body), epilogue), e| {
                Item::Apply(ApplyDecl {
                    results,
                    name,
                    operands,
                    result_types,
                    over,
                    body,
                    epilogue,
                    span: e.span(),
                })
            },
        );

    let output = just(Token::Output)
        .ignore_then(local)
        .then(box_lit)
        .map_with(|(temp, domain), e| {
            Item::Output(OutputDecl {
                temp,
                domain,
                span: e.span(),
            })
        });

    let item = choice((buffer, apply, output));

    // ── Function: 'func' name 'rank' N '{' item* '}' ──

    let func = just(Token::Func)
        .ignore_then(ident)
        .then_ignore(just(Token::Rank))
        .then(int.map_with(|rank, e| (rank, e.span())))
        .then(
            item.repeated()
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBrace), just(Token::RBrace)),
        )
        .map_with(|((name, (rank, rank_span)), items), e| FuncDecl {
            name,
            rank,
            rank_span,
            items,
            span: e.span(),
        });

    // ── Module ──

    func.repeated()
        .collect::<Vec<_>>()
        .map_with(|functions, e| ModuleAst {
            functions,
            span: e.span(),
        })
}

// ── Tests ──
