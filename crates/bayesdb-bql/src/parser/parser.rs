//! BQL parser implementation.

use super::error::{LexicalError, ParseError, SyntaxError};
use super::pratt::{
    infix_binding_power, prefix_binding_power, token_to_binary_op, token_to_unary_op,
};
use crate::ast::{
    AlterGenerator, AlterGeneratorCmd, AlterPopulation, AlterPopulationCmd, AlterTableCmd,
    AnalysisBudget, Analyze, BinaryOp, BqlFn, ColumnPair, Constraint, CreateGenerator,
    CreatePopulation, DataType, DropModels, EstimateFrom, EstimateStatement, Expr, FunctionCall,
    InferStatement, InferTarget, Initialize, JoinClause, JoinType, Literal, ModelRange, ModelSpec,
    OrderBy, OrderDirection, Phrase, PopulationClause, Query, SelectColumn, SelectStatement,
    SimulateStatement, TableRef, TimeUnit,
};
use crate::lexer::{Keyword, Lexer, Span, Token, TokenKind};

type PResult<T> = Result<T, SyntaxError>;

/// Parameter slot assignment for one phrase.
///
/// Plain `?` takes the next free index; `?N` pins index `N` and moves the
/// counter past it; named parameters share one slot per distinct name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamTable {
    count: usize,
    named: Vec<(String, usize)>,
}

impl ParamTable {
    fn reset(&mut self) {
        self.count = 0;
        self.named.clear();
    }

    fn positional(&mut self) -> usize {
        self.count += 1;
        self.count
    }

    fn numbered(&mut self, n: u32) -> usize {
        let n = n as usize;
        if n > self.count {
            self.count = n;
        }
        n
    }

    fn named(&mut self, name: &str) -> usize {
        if let Some((_, pos)) = self.named.iter().find(|(n, _)| n == name) {
            return *pos;
        }
        self.count += 1;
        self.named.push((String::from(name), self.count));
        self.count
    }

    /// Number of parameter slots the phrase requires.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Returns true if the phrase takes no parameters.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Name-to-slot assignments for named parameters (sigil included).
    #[must_use]
    pub fn named_params(&self) -> &[(String, usize)] {
        &self.named
    }
}

/// BQL parser.
///
/// Parses a semicolon-separated sequence of phrases. After an error the
/// caller may resume at the next phrase with [`Parser::skip_to_next_phrase`].
pub struct Parser<'a> {
    input: &'a str,
    lexer: Lexer<'a>,
    current: Token,
    params: ParamTable,
}

impl<'a> Parser<'a> {
    /// Creates a new parser for the given input.
    #[must_use]
    pub fn new(input: &'a str) -> Self {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token();
        Self {
            input,
            lexer,
            current,
            params: ParamTable::default(),
        }
    }

    /// Parses every phrase in `input`, failing on the first error.
    ///
    /// # Errors
    ///
    /// Returns the first [`SyntaxError`] encountered.
    pub fn parse(input: &'a str) -> Result<Vec<Phrase>, SyntaxError> {
        let mut parser = Self::new(input);
        let mut phrases = Vec::new();
        while let Some(phrase) = parser.parse_phrase()? {
            phrases.push(phrase);
        }
        Ok(phrases)
    }

    /// The parameter slots of the most recently parsed phrase.
    #[must_use]
    pub fn params(&self) -> &ParamTable {
        &self.params
    }

    /// Parses the next phrase, or returns `None` at end of input.
    ///
    /// # Errors
    ///
    /// Returns a [`SyntaxError`] when the phrase is malformed; the parser
    /// is left mid-phrase and [`Parser::skip_to_next_phrase`] resumes it.
    pub fn parse_phrase(&mut self) -> PResult<Option<Phrase>> {
        if self.current.is_eof() {
            return Ok(None);
        }
        if self.check(&TokenKind::Semicolon) {
            self.advance();
            return Ok(Some(Phrase::Empty));
        }

        self.params.reset();
        let phrase = self.parse_phrase_body()?;

        if self.check(&TokenKind::Semicolon) {
            self.advance();
        } else if !self.current.is_eof() {
            return Err(self.err_unexpected("';'"));
        }
        Ok(Some(phrase))
    }

    /// Discards tokens up to and including the next semicolon.
    pub fn skip_to_next_phrase(&mut self) {
        loop {
            match &self.current.kind {
                TokenKind::Eof => break,
                TokenKind::Semicolon => {
                    self.advance();
                    break;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    // ---- token plumbing ----

    fn advance(&mut self) -> Token {
        let next = self.lexer.next_token();
        core::mem::replace(&mut self.current, next)
    }

    /// Peeks at the token after the current one.
    fn peek_second(&self) -> Token {
        self.lexer.clone().next_token()
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current.kind == kind
    }

    fn check_keyword(&self, kw: Keyword) -> bool {
        self.current.as_keyword() == Some(kw)
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.check_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> PResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.err_unexpected(&format!("{kind:?}")))
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> PResult<()> {
        if self.check_keyword(kw) {
            self.advance();
            Ok(())
        } else {
            Err(self.err_unexpected(kw.as_str()))
        }
    }

    /// Consumes a name: an identifier, or a non-reserved keyword spelled
    /// as in the source.
    fn expect_name(&mut self) -> PResult<String> {
        match &self.current.kind {
            TokenKind::Identifier(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            TokenKind::Keyword(kw) if !kw.is_reserved() => {
                let span = self.current.span;
                self.advance();
                Ok(String::from(&self.input[span.start..span.end]))
            }
            _ => Err(self.err_unexpected("a name")),
        }
    }

    fn expect_integer(&mut self) -> PResult<i64> {
        match self.current.kind {
            TokenKind::Integer(n) => {
                self.advance();
                Ok(n)
            }
            _ => Err(self.err_unexpected("an integer")),
        }
    }

    /// Builds the error for the current token, surfacing lexer failures
    /// as lexical errors rather than unexpected-token noise.
    fn err_unexpected(&self, expected: &str) -> SyntaxError {
        if let TokenKind::Error(reason) = &self.current.kind {
            let (line, column) = self.current.span.line_col(self.input);
            return SyntaxError::Lexical(LexicalError {
                line,
                column,
                reason: reason.clone(),
            });
        }
        SyntaxError::Parse(ParseError::unexpected(
            expected,
            self.current.kind.clone(),
            self.current.span,
        ))
    }

    // ---- phrase dispatch ----

    fn parse_phrase_body(&mut self) -> PResult<Phrase> {
        match self.current.as_keyword() {
            Some(Keyword::Begin) => {
                self.advance();
                self.eat_keyword(Keyword::Transaction);
                Ok(Phrase::Begin)
            }
            Some(Keyword::Commit) => {
                self.advance();
                self.eat_keyword(Keyword::Transaction);
                Ok(Phrase::Commit)
            }
            Some(Keyword::Rollback) => {
                self.advance();
                self.eat_keyword(Keyword::Transaction);
                Ok(Phrase::Rollback)
            }
            Some(Keyword::Create) => self.parse_create(),
            Some(Keyword::Drop) => self.parse_drop(),
            Some(Keyword::Alter) => self.parse_alter(),
            Some(Keyword::Initialize) => self.parse_initialize().map(Phrase::Initialize),
            Some(Keyword::Analyze) => self.parse_analyze().map(Phrase::Analyze),
            Some(
                Keyword::Select | Keyword::Estimate | Keyword::Infer | Keyword::Simulate,
            ) => Ok(Phrase::Query(self.parse_query()?)),
            _ => Err(self.err_unexpected("a BQL phrase")),
        }
    }

    fn parse_query(&mut self) -> PResult<Query> {
        match self.current.as_keyword() {
            Some(Keyword::Select) => Ok(Query::Select(self.parse_select_statement()?)),
            Some(Keyword::Estimate) => Ok(Query::Estimate(self.parse_estimate_statement()?)),
            Some(Keyword::Infer) => Ok(Query::Infer(self.parse_infer_statement()?)),
            Some(Keyword::Simulate) => Ok(Query::Simulate(self.parse_simulate_statement()?)),
            _ => Err(self.err_unexpected("SELECT, ESTIMATE, INFER, or SIMULATE")),
        }
    }

    // ---- DDL ----

    fn parse_create(&mut self) -> PResult<Phrase> {
        self.expect_keyword(Keyword::Create)?;

        let temp = self.eat_keyword(Keyword::Temp) || self.eat_keyword(Keyword::Temporary);
        if temp || self.check_keyword(Keyword::Table) {
            return self.parse_create_table(temp);
        }

        match self.current.as_keyword() {
            Some(Keyword::Population) => {
                self.advance();
                self.parse_create_population().map(Phrase::CreatePopulation)
            }
            Some(Keyword::Generator) => {
                self.advance();
                self.parse_create_generator().map(Phrase::CreateGenerator)
            }
            _ => Err(self.err_unexpected("TABLE, POPULATION, or GENERATOR")),
        }
    }

    fn parse_if_not_exists(&mut self) -> PResult<bool> {
        if self.check_keyword(Keyword::If) {
            self.advance();
            self.expect_keyword(Keyword::Not)?;
            self.expect_keyword(Keyword::Exists)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn parse_if_exists(&mut self) -> PResult<bool> {
        if self.check_keyword(Keyword::If) {
            self.advance();
            self.expect_keyword(Keyword::Exists)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn parse_create_table(&mut self, temp: bool) -> PResult<Phrase> {
        self.expect_keyword(Keyword::Table)?;
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.expect_name()?;

        if self.eat_keyword(Keyword::As) {
            let query = self.parse_query()?;
            Ok(Phrase::CreateTableAs {
                temp,
                if_not_exists,
                name,
                query: Box::new(query),
            })
        } else if self.check(&TokenKind::LeftParen) {
            let defs = self.parse_balanced_text()?;
            Ok(Phrase::CreateTable {
                temp,
                if_not_exists,
                name,
                defs,
            })
        } else {
            Err(self.err_unexpected("AS or '('"))
        }
    }

    /// Captures the raw source text between a balanced pair of
    /// parentheses, starting at the current `(`.
    fn parse_balanced_text(&mut self) -> PResult<String> {
        let open = self.expect(&TokenKind::LeftParen)?;
        let start = open.span.end;
        let mut depth = 1usize;
        loop {
            match &self.current.kind {
                TokenKind::LeftParen => {
                    depth += 1;
                    self.advance();
                }
                TokenKind::RightParen => {
                    depth -= 1;
                    let close = self.advance();
                    if depth == 0 {
                        let text = &self.input[start..close.span.start];
                        return Ok(String::from(text.trim()));
                    }
                }
                TokenKind::Eof => return Err(self.err_unexpected("')'")),
                TokenKind::Error(_) => return Err(self.err_unexpected("')'")),
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn parse_drop(&mut self) -> PResult<Phrase> {
        self.expect_keyword(Keyword::Drop)?;
        match self.current.as_keyword() {
            Some(Keyword::Table) => {
                self.advance();
                let if_exists = self.parse_if_exists()?;
                let name = self.expect_name()?;
                Ok(Phrase::DropTable { if_exists, name })
            }
            Some(Keyword::Population) => {
                self.advance();
                let if_exists = self.parse_if_exists()?;
                let name = self.expect_name()?;
                Ok(Phrase::DropPopulation { if_exists, name })
            }
            Some(Keyword::Generator) => {
                self.advance();
                let if_exists = self.parse_if_exists()?;
                let name = self.expect_name()?;
                Ok(Phrase::DropGenerator { if_exists, name })
            }
            Some(Keyword::Models | Keyword::Model) => {
                self.advance();
                let models = if matches!(self.current.kind, TokenKind::Integer(_)) {
                    Some(self.parse_model_ranges()?)
                } else {
                    None
                };
                self.expect_keyword(Keyword::From)?;
                let generator = self.expect_name()?;
                Ok(Phrase::DropModels(DropModels { generator, models }))
            }
            _ => Err(self.err_unexpected("TABLE, POPULATION, GENERATOR, or MODELS")),
        }
    }

    fn parse_alter(&mut self) -> PResult<Phrase> {
        self.expect_keyword(Keyword::Alter)?;
        match self.current.as_keyword() {
            Some(Keyword::Table) => {
                self.advance();
                let table = self.expect_name()?;
                let mut commands = vec![self.parse_alter_table_cmd()?];
                while self.check(&TokenKind::Comma) {
                    self.advance();
                    commands.push(self.parse_alter_table_cmd()?);
                }
                Ok(Phrase::AlterTable { table, commands })
            }
            Some(Keyword::Population) => {
                self.advance();
                let population = self.expect_name()?;
                let mut commands = vec![self.parse_alter_population_cmd()?];
                while self.check(&TokenKind::Comma) {
                    self.advance();
                    commands.push(self.parse_alter_population_cmd()?);
                }
                Ok(Phrase::AlterPopulation(AlterPopulation {
                    population,
                    commands,
                }))
            }
            Some(Keyword::Generator) => {
                self.advance();
                let generator = self.expect_name()?;
                let mut commands = vec![self.parse_alter_generator_cmd()?];
                while self.check(&TokenKind::Comma) {
                    self.advance();
                    commands.push(self.parse_alter_generator_cmd()?);
                }
                Ok(Phrase::AlterGenerator(AlterGenerator {
                    generator,
                    commands,
                }))
            }
            _ => Err(self.err_unexpected("TABLE, POPULATION, or GENERATOR")),
        }
    }

    fn parse_alter_table_cmd(&mut self) -> PResult<AlterTableCmd> {
        self.expect_keyword(Keyword::Rename)?;
        self.expect_keyword(Keyword::To)?;
        Ok(AlterTableCmd::RenameTo(self.expect_name()?))
    }

    fn parse_alter_population_cmd(&mut self) -> PResult<AlterPopulationCmd> {
        match self.current.as_keyword() {
            Some(Keyword::Add) => {
                self.advance();
                self.expect_keyword(Keyword::Variable)?;
                let name = self.expect_name()?;
                let stattype = self.expect_name()?;
                Ok(AlterPopulationCmd::AddVariable { name, stattype })
            }
            Some(Keyword::Set) => {
                self.advance();
                if !self.eat_keyword(Keyword::Stattypes) {
                    self.expect_keyword(Keyword::Stattype)?;
                }
                self.expect_keyword(Keyword::Of)?;
                let columns = self.parse_name_list()?;
                self.expect_keyword(Keyword::To)?;
                let stattype = self.expect_name()?;
                Ok(AlterPopulationCmd::SetStattypes { columns, stattype })
            }
            Some(Keyword::Rename) => {
                self.advance();
                self.expect_keyword(Keyword::To)?;
                Ok(AlterPopulationCmd::RenameTo(self.expect_name()?))
            }
            _ => Err(self.err_unexpected("ADD, SET, or RENAME")),
        }
    }

    fn parse_alter_generator_cmd(&mut self) -> PResult<AlterGeneratorCmd> {
        self.expect_keyword(Keyword::Rename)?;
        self.expect_keyword(Keyword::To)?;
        Ok(AlterGeneratorCmd::RenameTo(self.expect_name()?))
    }

    // ---- MML ----

    fn parse_create_population(&mut self) -> PResult<CreatePopulation> {
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.expect_name()?;
        self.expect_keyword(Keyword::For)?;
        let table = self.expect_name()?;
        self.expect_keyword(Keyword::With)?;
        self.expect_keyword(Keyword::Schema)?;
        self.expect(&TokenKind::LeftParen)?;

        let mut clauses = Vec::new();
        loop {
            // Tolerate stray separators, including a trailing one.
            while self.check(&TokenKind::Semicolon) || self.check(&TokenKind::Comma) {
                self.advance();
            }
            if self.check(&TokenKind::RightParen) {
                break;
            }
            clauses.push(self.parse_population_clause()?);
            if !self.check(&TokenKind::Semicolon)
                && !self.check(&TokenKind::Comma)
                && !self.check(&TokenKind::RightParen)
            {
                return Err(self.err_unexpected("';', ',', or ')'"));
            }
        }
        self.expect(&TokenKind::RightParen)?;

        Ok(CreatePopulation {
            if_not_exists,
            name,
            table,
            clauses,
        })
    }

    fn parse_population_clause(&mut self) -> PResult<PopulationClause> {
        match self.current.as_keyword() {
            Some(Keyword::Model) => {
                self.advance();
                let columns = self.parse_name_list()?;
                self.expect_keyword(Keyword::As)?;
                let stattype = self.expect_name()?;
                Ok(PopulationClause::Model { columns, stattype })
            }
            Some(Keyword::Set) => {
                self.advance();
                if !self.eat_keyword(Keyword::Stattypes) {
                    self.expect_keyword(Keyword::Stattype)?;
                }
                self.expect_keyword(Keyword::Of)?;
                let columns = self.parse_name_list()?;
                self.expect_keyword(Keyword::To)?;
                let stattype = self.expect_name()?;
                Ok(PopulationClause::Model { columns, stattype })
            }
            Some(Keyword::Ignore) => {
                self.advance();
                let columns = self.parse_name_list()?;
                Ok(PopulationClause::Ignore { columns })
            }
            _ => Err(self.err_unexpected("MODEL, SET STATTYPES, or IGNORE")),
        }
    }

    fn parse_create_generator(&mut self) -> PResult<CreateGenerator> {
        let if_not_exists = self.parse_if_not_exists()?;
        let name = self.expect_name()?;
        self.expect_keyword(Keyword::For)?;
        let population = self.expect_name()?;
        self.expect_keyword(Keyword::Using)?;
        let backend = self.expect_name()?;
        let schema = if self.check(&TokenKind::LeftParen) {
            self.parse_balanced_text()?
        } else {
            String::new()
        };
        Ok(CreateGenerator {
            if_not_exists,
            name,
            population,
            backend,
            schema,
        })
    }

    fn parse_initialize(&mut self) -> PResult<Initialize> {
        self.expect_keyword(Keyword::Initialize)?;
        let n = self.expect_integer()?;
        let n_models = u32::try_from(n)
            .map_err(|_| SyntaxError::Parse(ParseError::new("Model count out of range", self.current.span)))?;
        if !self.eat_keyword(Keyword::Models) {
            self.expect_keyword(Keyword::Model)?;
        }
        let if_not_exists = self.parse_if_not_exists()?;
        self.expect_keyword(Keyword::For)?;
        let generator = self.expect_name()?;
        Ok(Initialize {
            n_models,
            if_not_exists,
            generator,
        })
    }

    fn parse_analyze(&mut self) -> PResult<Analyze> {
        self.expect_keyword(Keyword::Analyze)?;
        let generator = self.expect_name()?;

        let models = if self.eat_keyword(Keyword::Models) || self.eat_keyword(Keyword::Model) {
            Some(self.parse_model_ranges()?)
        } else {
            None
        };

        self.expect_keyword(Keyword::For)?;
        let budget = self.parse_analysis_budget()?;

        let checkpoint = if self.eat_keyword(Keyword::Checkpoint) {
            Some(self.parse_analysis_budget()?)
        } else {
            None
        };

        let program = if self.check(&TokenKind::LeftParen) {
            let text = self.parse_balanced_text()?;
            if text.is_empty() { None } else { Some(text) }
        } else {
            None
        };

        Ok(Analyze {
            generator,
            models,
            budget,
            checkpoint,
            program,
        })
    }

    fn parse_analysis_budget(&mut self) -> PResult<AnalysisBudget> {
        let n = self.expect_integer()?;
        let amount = u64::try_from(n).map_err(|_| {
            SyntaxError::Parse(ParseError::new("Budget out of range", self.current.span))
        })?;
        let unit = match self.current.as_keyword() {
            Some(Keyword::Iteration | Keyword::Iterations) => TimeUnit::Iterations,
            Some(Keyword::Second | Keyword::Seconds) => TimeUnit::Seconds,
            Some(Keyword::Minute | Keyword::Minutes) => TimeUnit::Minutes,
            _ => return Err(self.err_unexpected("ITERATIONS, SECONDS, or MINUTES")),
        };
        self.advance();
        Ok(AnalysisBudget { amount, unit })
    }

    fn parse_model_ranges(&mut self) -> PResult<Vec<ModelRange>> {
        let mut ranges = Vec::new();
        loop {
            let lo = self.parse_model_index()?;
            let hi = if self.check(&TokenKind::Minus) {
                self.advance();
                Some(self.parse_model_index()?)
            } else {
                None
            };
            ranges.push(ModelRange { lo, hi });
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        Ok(ranges)
    }

    fn parse_model_index(&mut self) -> PResult<u32> {
        let n = self.expect_integer()?;
        u32::try_from(n).map_err(|_| {
            SyntaxError::Parse(ParseError::new("Model index out of range", self.current.span))
        })
    }

    // ---- queries ----

    fn parse_distinct(&mut self) -> bool {
        if self.eat_keyword(Keyword::Distinct) {
            true
        } else {
            self.eat_keyword(Keyword::All);
            false
        }
    }

    fn parse_select_statement(&mut self) -> PResult<SelectStatement> {
        self.expect_keyword(Keyword::Select)?;
        let distinct = self.parse_distinct();
        let columns = self.parse_select_columns()?;

        let from = if self.eat_keyword(Keyword::From) {
            Some(self.parse_table_ref()?)
        } else {
            None
        };

        let where_clause = if self.eat_keyword(Keyword::Where) {
            Some(self.parse_expression(0)?)
        } else {
            None
        };

        let group_by = if self.check_keyword(Keyword::Group) {
            self.advance();
            self.expect_keyword(Keyword::By)?;
            self.parse_expression_list()?
        } else {
            vec![]
        };

        let having = if self.eat_keyword(Keyword::Having) {
            Some(self.parse_expression(0)?)
        } else {
            None
        };

        let order_by = if self.check_keyword(Keyword::Order) {
            self.advance();
            self.expect_keyword(Keyword::By)?;
            self.parse_order_by_list()?
        } else {
            vec![]
        };

        let limit = if self.eat_keyword(Keyword::Limit) {
            Some(self.parse_expression(0)?)
        } else {
            None
        };

        let offset = if self.eat_keyword(Keyword::Offset) {
            Some(self.parse_expression(0)?)
        } else {
            None
        };

        Ok(SelectStatement {
            distinct,
            columns,
            from,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_estimate_statement(&mut self) -> PResult<EstimateStatement> {
        self.expect_keyword(Keyword::Estimate)?;
        let distinct = self.parse_distinct();
        let columns = self.parse_select_columns()?;

        self.expect_keyword(Keyword::From)?;
        let (from, population) = self.parse_estimate_from()?;
        let models = self.parse_model_spec()?;

        let where_clause = if self.eat_keyword(Keyword::Where) {
            Some(self.parse_expression(0)?)
        } else {
            None
        };

        let group_by = if self.check_keyword(Keyword::Group) {
            self.advance();
            self.expect_keyword(Keyword::By)?;
            self.parse_expression_list()?
        } else {
            vec![]
        };

        let having = if self.eat_keyword(Keyword::Having) {
            Some(self.parse_expression(0)?)
        } else {
            None
        };

        let order_by = if self.check_keyword(Keyword::Order) {
            self.advance();
            self.expect_keyword(Keyword::By)?;
            self.parse_order_by_list()?
        } else {
            vec![]
        };

        let limit = if self.eat_keyword(Keyword::Limit) {
            Some(self.parse_expression(0)?)
        } else {
            None
        };

        let offset = if self.eat_keyword(Keyword::Offset) {
            Some(self.parse_expression(0)?)
        } else {
            None
        };

        Ok(EstimateStatement {
            distinct,
            columns,
            from,
            population,
            models,
            where_clause,
            group_by,
            having,
            order_by,
            limit,
            offset,
        })
    }

    /// Parses the source of an ESTIMATE: `p`, `PAIRWISE p`,
    /// `[PAIRWISE] VARIABLES OF p`, with `COLUMNS` as a synonym for
    /// `VARIABLES`.
    fn parse_estimate_from(&mut self) -> PResult<(EstimateFrom, String)> {
        if self.eat_keyword(Keyword::Pairwise) {
            if self.eat_keyword(Keyword::Variables) || self.eat_keyword(Keyword::Columns) {
                self.expect_keyword(Keyword::Of)?;
                let population = self.expect_name()?;
                let subcols = if self.eat_keyword(Keyword::For) {
                    if self.check(&TokenKind::LeftParen) {
                        self.advance();
                        let cols = self.parse_name_list()?;
                        self.expect(&TokenKind::RightParen)?;
                        cols
                    } else {
                        self.parse_name_list()?
                    }
                } else {
                    vec![]
                };
                Ok((EstimateFrom::PairwiseVariables { subcols }, population))
            } else {
                let population = self.expect_name()?;
                Ok((EstimateFrom::PairwiseRows, population))
            }
        } else if self.eat_keyword(Keyword::Variables) || self.eat_keyword(Keyword::Columns) {
            self.expect_keyword(Keyword::Of)?;
            let population = self.expect_name()?;
            Ok((EstimateFrom::Variables, population))
        } else {
            let population = self.expect_name()?;
            Ok((EstimateFrom::Rows, population))
        }
    }

    fn parse_model_spec(&mut self) -> PResult<ModelSpec> {
        let modeled_by = if self.check_keyword(Keyword::Modeled) {
            self.advance();
            self.expect_keyword(Keyword::By)?;
            Some(self.expect_name()?)
        } else {
            None
        };

        let models = if self.check_keyword(Keyword::Using) {
            self.advance();
            if !self.eat_keyword(Keyword::Models) {
                self.expect_keyword(Keyword::Model)?;
            }
            Some(self.parse_model_ranges()?)
        } else {
            None
        };

        Ok(ModelSpec { modeled_by, models })
    }

    fn parse_infer_statement(&mut self) -> PResult<InferStatement> {
        self.expect_keyword(Keyword::Infer)?;
        let explicit = self.eat_keyword(Keyword::Explicit);

        let mut targets = Vec::new();
        loop {
            targets.push(if explicit {
                self.parse_infer_explicit_target()?
            } else {
                self.parse_infer_implicit_target()?
            });
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }

        let confidence = if !explicit && self.check_keyword(Keyword::With) {
            self.advance();
            self.expect_keyword(Keyword::Confidence)?;
            Some(self.parse_expression(0)?)
        } else {
            None
        };

        self.expect_keyword(Keyword::From)?;
        let population = self.expect_name()?;
        let models = self.parse_model_spec()?;

        let where_clause = if self.eat_keyword(Keyword::Where) {
            Some(self.parse_expression(0)?)
        } else {
            None
        };

        let group_by = if self.check_keyword(Keyword::Group) {
            self.advance();
            self.expect_keyword(Keyword::By)?;
            self.parse_expression_list()?
        } else {
            vec![]
        };

        let order_by = if self.check_keyword(Keyword::Order) {
            self.advance();
            self.expect_keyword(Keyword::By)?;
            self.parse_order_by_list()?
        } else {
            vec![]
        };

        let limit = if self.eat_keyword(Keyword::Limit) {
            Some(self.parse_expression(0)?)
        } else {
            None
        };

        let offset = if self.eat_keyword(Keyword::Offset) {
            Some(self.parse_expression(0)?)
        } else {
            None
        };

        Ok(InferStatement {
            explicit,
            targets,
            confidence,
            population,
            models,
            where_clause,
            group_by,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_infer_implicit_target(&mut self) -> PResult<InferTarget> {
        if self.check(&TokenKind::Star) {
            self.advance();
            return Ok(InferTarget::Star);
        }
        let name = self.expect_name()?;
        let alias = self.parse_optional_alias()?;
        Ok(InferTarget::Column { name, alias })
    }

    fn parse_infer_explicit_target(&mut self) -> PResult<InferTarget> {
        if self.check_keyword(Keyword::Predict) {
            self.advance();
            let column = self.expect_name()?;
            let alias = self.parse_optional_alias()?;
            self.expect_keyword(Keyword::Confidence)?;
            let confidence = self.expect_name()?;
            let samples = if self.check_keyword(Keyword::Using) {
                self.advance();
                let n = self.parse_expression(0)?;
                self.expect_keyword(Keyword::Samples)?;
                Some(n)
            } else {
                None
            };
            return Ok(InferTarget::Predict {
                column,
                alias,
                confidence,
                samples,
            });
        }
        let expr = self.parse_expression(0)?;
        let alias = self.parse_optional_alias()?;
        Ok(InferTarget::Expr { expr, alias })
    }

    fn parse_simulate_statement(&mut self) -> PResult<SimulateStatement> {
        self.expect_keyword(Keyword::Simulate)?;
        let columns = self.parse_name_list()?;
        self.expect_keyword(Keyword::From)?;
        let population = self.expect_name()?;

        let givens = if self.eat_keyword(Keyword::Given) {
            self.parse_constraint_list_bare()?
        } else {
            vec![]
        };

        let models = self.parse_model_spec()?;

        self.expect_keyword(Keyword::Limit)?;
        let limit = self.parse_expression(0)?;

        Ok(SimulateStatement {
            columns,
            population,
            models,
            givens,
            limit,
        })
    }

    // ---- shared clause helpers ----

    fn parse_select_columns(&mut self) -> PResult<Vec<SelectColumn>> {
        let mut columns = vec![];

        loop {
            let expr = self.parse_expression(0)?;
            let alias = self.parse_optional_alias()?;
            columns.push(SelectColumn { expr, alias });

            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }

        Ok(columns)
    }

    fn parse_optional_alias(&mut self) -> PResult<Option<String>> {
        if self.eat_keyword(Keyword::As) {
            Ok(Some(self.expect_name()?))
        } else if matches!(&self.current.kind, TokenKind::Identifier(_)) {
            Ok(Some(self.expect_name()?))
        } else {
            Ok(None)
        }
    }

    fn parse_name_list(&mut self) -> PResult<Vec<String>> {
        let mut names = vec![self.expect_name()?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            names.push(self.expect_name()?);
        }
        Ok(names)
    }

    fn parse_expression_list(&mut self) -> PResult<Vec<Expr>> {
        let mut exprs = vec![self.parse_expression(0)?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            exprs.push(self.parse_expression(0)?);
        }
        Ok(exprs)
    }

    fn parse_order_by_list(&mut self) -> PResult<Vec<OrderBy>> {
        let mut items = vec![];
        loop {
            let expr = self.parse_expression(0)?;
            let (direction, explicit_direction) = if self.eat_keyword(Keyword::Desc) {
                (OrderDirection::Desc, true)
            } else if self.eat_keyword(Keyword::Asc) {
                (OrderDirection::Asc, true)
            } else {
                (OrderDirection::Asc, false)
            };

            items.push(OrderBy {
                expr,
                direction,
                explicit_direction,
            });

            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        Ok(items)
    }

    fn parse_table_ref(&mut self) -> PResult<TableRef> {
        let mut table_ref = if self.check(&TokenKind::LeftParen) {
            self.advance();
            if self.check_keyword(Keyword::Select) {
                let query = self.parse_select_statement()?;
                self.expect(&TokenKind::RightParen)?;
                let alias = self.parse_optional_alias()?;
                TableRef::Subquery {
                    query: Box::new(query),
                    alias: alias.unwrap_or_else(|| String::from("subquery")),
                }
            } else {
                let inner = self.parse_table_ref()?;
                self.expect(&TokenKind::RightParen)?;
                inner
            }
        } else {
            let name = self.expect_name()?;
            let alias = self.parse_optional_alias()?;
            TableRef::Table { name, alias }
        };

        while self.is_join_keyword() {
            let join_type = self.parse_join_type()?;
            let name = self.expect_name()?;
            let alias = self.parse_optional_alias()?;
            let right = TableRef::Table { name, alias };

            let (on, using) = if join_type == JoinType::Cross {
                (None, vec![])
            } else if self.eat_keyword(Keyword::On) {
                (Some(self.parse_expression(0)?), vec![])
            } else if self.eat_keyword(Keyword::Using) {
                self.expect(&TokenKind::LeftParen)?;
                let cols = self.parse_name_list()?;
                self.expect(&TokenKind::RightParen)?;
                (None, cols)
            } else {
                return Err(self.err_unexpected("ON or USING"));
            };

            table_ref = TableRef::Join {
                left: Box::new(table_ref),
                join: Box::new(JoinClause {
                    join_type,
                    table: right,
                    on,
                    using,
                }),
            };
        }

        Ok(table_ref)
    }

    fn is_join_keyword(&self) -> bool {
        matches!(
            self.current.as_keyword(),
            Some(
                Keyword::Join
                    | Keyword::Inner
                    | Keyword::Left
                    | Keyword::Right
                    | Keyword::Full
                    | Keyword::Cross
            )
        )
    }

    fn parse_join_type(&mut self) -> PResult<JoinType> {
        let join_type = match self.current.as_keyword() {
            Some(Keyword::Join) => {
                self.advance();
                JoinType::Inner
            }
            Some(Keyword::Inner) => {
                self.advance();
                self.expect_keyword(Keyword::Join)?;
                JoinType::Inner
            }
            Some(Keyword::Left) => {
                self.advance();
                self.eat_keyword(Keyword::Outer);
                self.expect_keyword(Keyword::Join)?;
                JoinType::Left
            }
            Some(Keyword::Right) => {
                self.advance();
                self.eat_keyword(Keyword::Outer);
                self.expect_keyword(Keyword::Join)?;
                JoinType::Right
            }
            Some(Keyword::Full) => {
                self.advance();
                self.eat_keyword(Keyword::Outer);
                self.expect_keyword(Keyword::Join)?;
                JoinType::Full
            }
            Some(Keyword::Cross) => {
                self.advance();
                self.expect_keyword(Keyword::Join)?;
                JoinType::Cross
            }
            _ => return Err(self.err_unexpected("a JOIN keyword")),
        };
        Ok(join_type)
    }

    // ---- expressions ----

    fn parse_expression(&mut self, min_bp: u8) -> PResult<Expr> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let (l_bp, r_bp) = match infix_binding_power(&self.current.kind) {
                Some(bp) => bp,
                None => break,
            };

            if l_bp < min_bp {
                break;
            }

            match &self.current.kind {
                TokenKind::Keyword(Keyword::Is) => {
                    self.advance();
                    let negated = self.eat_keyword(Keyword::Not);
                    self.expect_keyword(Keyword::Null)?;
                    lhs = Expr::IsNull {
                        expr: Box::new(lhs),
                        negated,
                    };
                }
                TokenKind::Keyword(Keyword::In) => {
                    self.advance();
                    lhs = self.parse_in_tail(lhs, false)?;
                }
                TokenKind::Keyword(Keyword::Between) => {
                    self.advance();
                    lhs = self.parse_between_tail(lhs, false, r_bp)?;
                }
                TokenKind::Keyword(Keyword::Not) => {
                    self.advance();
                    match self.current.as_keyword() {
                        Some(Keyword::In) => {
                            self.advance();
                            lhs = self.parse_in_tail(lhs, true)?;
                        }
                        Some(Keyword::Between) => {
                            self.advance();
                            lhs = self.parse_between_tail(lhs, true, r_bp)?;
                        }
                        Some(Keyword::Like) => {
                            self.advance();
                            let rhs = self.parse_expression(r_bp)?;
                            lhs = Expr::Binary {
                                left: Box::new(lhs),
                                op: BinaryOp::NotLike,
                                right: Box::new(rhs),
                            };
                        }
                        _ => return Err(self.err_unexpected("IN, BETWEEN, or LIKE")),
                    }
                }
                TokenKind::Keyword(Keyword::Collate) => {
                    self.advance();
                    let collation = self.expect_name()?;
                    lhs = Expr::Collate {
                        expr: Box::new(lhs),
                        collation,
                    };
                }
                _ => {
                    if let Some(op) = token_to_binary_op(&self.current.kind) {
                        self.advance();
                        let rhs = self.parse_expression(r_bp)?;
                        lhs = Expr::Binary {
                            left: Box::new(lhs),
                            op,
                            right: Box::new(rhs),
                        };
                    } else {
                        break;
                    }
                }
            }
        }

        Ok(lhs)
    }

    fn parse_in_tail(&mut self, lhs: Expr, negated: bool) -> PResult<Expr> {
        self.expect(&TokenKind::LeftParen)?;
        let list = if self.check_keyword(Keyword::Select) {
            vec![Expr::Subquery(Box::new(self.parse_select_statement()?))]
        } else {
            self.parse_expression_list()?
        };
        self.expect(&TokenKind::RightParen)?;
        Ok(Expr::In {
            expr: Box::new(lhs),
            list,
            negated,
        })
    }

    fn parse_between_tail(&mut self, lhs: Expr, negated: bool, r_bp: u8) -> PResult<Expr> {
        let low = self.parse_expression(r_bp)?;
        self.expect_keyword(Keyword::And)?;
        let high = self.parse_expression(r_bp)?;
        Ok(Expr::Between {
            expr: Box::new(lhs),
            low: Box::new(low),
            high: Box::new(high),
            negated,
        })
    }

    fn parse_prefix(&mut self) -> PResult<Expr> {
        if self.check(&TokenKind::Plus) {
            // Unary plus is a no-op
            self.advance();
            return self.parse_prefix();
        }
        if let Some(op) = token_to_unary_op(&self.current.kind) {
            let bp = prefix_binding_power(&self.current.kind).unwrap_or(19);
            self.advance();
            let operand = self.parse_expression(bp)?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }

        self.parse_primary()
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let token = self.current.clone();

        match &token.kind {
            // Literals
            TokenKind::Integer(n) => {
                let n = *n;
                self.advance();
                Ok(Expr::Literal(Literal::Integer(n)))
            }
            TokenKind::Float(f) => {
                let f = *f;
                self.advance();
                Ok(Expr::Literal(Literal::Float(f)))
            }
            TokenKind::String(s) => {
                let value = s.clone();
                self.advance();
                Ok(Expr::Literal(Literal::String(value)))
            }
            TokenKind::Blob(b) => {
                let value = b.clone();
                self.advance();
                Ok(Expr::Literal(Literal::Blob(value)))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.advance();
                Ok(Expr::Literal(Literal::Boolean(true)))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.advance();
                Ok(Expr::Literal(Literal::Boolean(false)))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.advance();
                Ok(Expr::Literal(Literal::Null))
            }

            // Parameters
            TokenKind::Placeholder => {
                self.advance();
                let position = self.params.positional();
                Ok(Expr::Parameter {
                    name: None,
                    position,
                })
            }
            TokenKind::NumberedPlaceholder(n) => {
                let n = *n;
                self.advance();
                let position = self.params.numbered(n);
                Ok(Expr::Parameter {
                    name: None,
                    position,
                })
            }
            TokenKind::NamedPlaceholder(name) => {
                let name = name.clone();
                self.advance();
                let position = self.params.named(&name);
                Ok(Expr::Parameter {
                    name: Some(name),
                    position,
                })
            }

            // Wildcard
            TokenKind::Star => {
                self.advance();
                Ok(Expr::Wildcard { table: None })
            }

            // Parenthesized expression or subquery
            TokenKind::LeftParen => {
                self.advance();
                if self.check_keyword(Keyword::Select) {
                    let subquery = self.parse_select_statement()?;
                    self.expect(&TokenKind::RightParen)?;
                    Ok(Expr::Subquery(Box::new(subquery)))
                } else {
                    let expr = self.parse_expression(0)?;
                    self.expect(&TokenKind::RightParen)?;
                    Ok(Expr::Paren(Box::new(expr)))
                }
            }

            // CAST / CASE / EXISTS
            TokenKind::Keyword(Keyword::Cast) => {
                self.advance();
                self.parse_cast_expression()
            }
            TokenKind::Keyword(Keyword::Case) => self.parse_case_expression(),
            TokenKind::Keyword(Keyword::Exists) => {
                self.advance();
                self.expect(&TokenKind::LeftParen)?;
                let subquery = self.parse_select_statement()?;
                self.expect(&TokenKind::RightParen)?;
                Ok(Expr::Exists {
                    query: Box::new(subquery),
                })
            }

            // Probabilistic operator forms; each falls back to a plain
            // name when the follow-up keyword is missing.
            TokenKind::Keyword(Keyword::Predictive)
                if self.peek_second().as_keyword() == Some(Keyword::Probability) =>
            {
                self.advance();
                self.advance();
                self.expect_keyword(Keyword::Of)?;
                let column = self.expect_name()?;
                let givens = self.parse_optional_givens()?;
                Ok(Expr::Bql(Box::new(BqlFn::PredictiveProbability {
                    column,
                    givens,
                })))
            }
            TokenKind::Keyword(Keyword::Probability)
                if self.peek_second().as_keyword() == Some(Keyword::Density) =>
            {
                self.advance();
                self.advance();
                self.expect_keyword(Keyword::Of)?;
                self.parse_probability_density_tail()
            }
            TokenKind::Keyword(Keyword::Similarity)
                if !self.is_name_continuation(&self.peek_second()) =>
            {
                self.advance();
                self.parse_similarity_tail()
            }
            TokenKind::Keyword(Keyword::Dependence)
                if self.peek_second().as_keyword() == Some(Keyword::Probability) =>
            {
                self.advance();
                self.advance();
                let pair = self.parse_column_pair()?;
                Ok(Expr::Bql(Box::new(BqlFn::DependenceProbability { pair })))
            }
            TokenKind::Keyword(Keyword::Mutual)
                if self.peek_second().as_keyword() == Some(Keyword::Information) =>
            {
                self.advance();
                self.advance();
                let pair = self.parse_column_pair()?;
                let givens = self.parse_optional_givens()?;
                let samples = self.parse_optional_samples()?;
                Ok(Expr::Bql(Box::new(BqlFn::MutualInformation {
                    pair,
                    givens,
                    samples,
                })))
            }
            TokenKind::Keyword(Keyword::Correlation)
                if !self.is_name_continuation(&self.peek_second()) =>
            {
                self.advance();
                let pvalue = self.eat_keyword(Keyword::Pvalue);
                let pair = self.parse_column_pair()?;
                Ok(Expr::Bql(Box::new(BqlFn::Correlation { pair, pvalue })))
            }

            // Names: column references and function calls. Non-reserved
            // keywords that did not begin an operator form land here too.
            TokenKind::Identifier(name) => {
                let name = name.clone();
                let span = token.span;
                self.advance();
                self.parse_name_expr(name, span)
            }
            TokenKind::Keyword(kw) if !kw.is_reserved() => {
                let span = token.span;
                let name = String::from(&self.input[span.start..span.end]);
                self.advance();
                self.parse_name_expr(name, span)
            }

            _ => Err(self.err_unexpected("an expression")),
        }
    }

    /// True when the token after an operator-like keyword forces the
    /// name reading: only `.` (qualified column) and `(` (function call)
    /// do. A bare `SIMILARITY` or `CORRELATION` is otherwise the
    /// estimator, not a column.
    fn is_name_continuation(&self, token: &Token) -> bool {
        matches!(token.kind, TokenKind::Dot | TokenKind::LeftParen)
    }

    fn parse_name_expr(&mut self, name: String, span: Span) -> PResult<Expr> {
        if self.check(&TokenKind::LeftParen) {
            return self.parse_function_call(name);
        }

        if self.check(&TokenKind::Dot) {
            self.advance();
            if self.check(&TokenKind::Star) {
                self.advance();
                return Ok(Expr::Wildcard { table: Some(name) });
            }
            let column = self.expect_name()?;
            return Ok(Expr::Column {
                table: Some(name),
                name: column,
                span,
            });
        }

        Ok(Expr::Column {
            table: None,
            name,
            span,
        })
    }

    fn parse_function_call(&mut self, name: String) -> PResult<Expr> {
        self.expect(&TokenKind::LeftParen)?;

        let distinct = self.eat_keyword(Keyword::Distinct);

        let args = if self.check(&TokenKind::RightParen) {
            vec![]
        } else if self.check(&TokenKind::Star) {
            self.advance();
            vec![Expr::Wildcard { table: None }]
        } else {
            self.parse_expression_list()?
        };

        self.expect(&TokenKind::RightParen)?;

        Ok(Expr::Function(FunctionCall {
            name,
            args,
            distinct,
        }))
    }

    fn parse_cast_expression(&mut self) -> PResult<Expr> {
        self.expect(&TokenKind::LeftParen)?;
        let expr = self.parse_expression(0)?;
        self.expect_keyword(Keyword::As)?;
        let data_type = self.parse_data_type()?;
        self.expect(&TokenKind::RightParen)?;

        Ok(Expr::Cast {
            expr: Box::new(expr),
            data_type,
        })
    }

    fn parse_case_expression(&mut self) -> PResult<Expr> {
        self.expect_keyword(Keyword::Case)?;

        let operand = if !self.check_keyword(Keyword::When) {
            Some(Box::new(self.parse_expression(0)?))
        } else {
            None
        };

        let mut when_clauses = vec![];
        while self.eat_keyword(Keyword::When) {
            let when_expr = self.parse_expression(0)?;
            self.expect_keyword(Keyword::Then)?;
            let then_expr = self.parse_expression(0)?;
            when_clauses.push((when_expr, then_expr));
        }

        let else_clause = if self.eat_keyword(Keyword::Else) {
            Some(Box::new(self.parse_expression(0)?))
        } else {
            None
        };

        self.expect_keyword(Keyword::End)?;

        Ok(Expr::Case {
            operand,
            when_clauses,
            else_clause,
        })
    }

    fn parse_data_type(&mut self) -> PResult<DataType> {
        let data_type = match self.current.as_keyword() {
            Some(Keyword::Int | Keyword::Integer) => {
                self.advance();
                DataType::Integer
            }
            Some(Keyword::Real) => {
                self.advance();
                DataType::Real
            }
            Some(Keyword::Text) => {
                self.advance();
                DataType::Text
            }
            Some(Keyword::Blob) => {
                self.advance();
                DataType::Blob
            }
            Some(Keyword::Numeric) => {
                self.advance();
                DataType::Numeric
            }
            _ => match &self.current.kind {
                TokenKind::Identifier(name) => {
                    let name = name.clone();
                    self.advance();
                    DataType::Custom(name)
                }
                _ => return Err(self.err_unexpected("a data type")),
            },
        };
        Ok(data_type)
    }

    // ---- BQL operator tails ----

    /// Parses what follows `PROBABILITY DENSITY OF`.
    fn parse_probability_density_tail(&mut self) -> PResult<Expr> {
        if self.eat_keyword(Keyword::Value) {
            // One-variable context: PROBABILITY DENSITY OF VALUE v
            let value = self.parse_expression(7)?;
            let givens = self.parse_optional_givens()?;
            return Ok(Expr::Bql(Box::new(BqlFn::ProbabilityOfValue {
                value: Box::new(value),
                givens,
            })));
        }

        let targets = if self.check(&TokenKind::LeftParen) {
            self.advance();
            let list = self.parse_constraint_list_parenthesized_body()?;
            self.expect(&TokenKind::RightParen)?;
            list
        } else {
            vec![self.parse_constraint(7)?]
        };
        let givens = self.parse_optional_givens()?;
        Ok(Expr::Bql(Box::new(BqlFn::ProbabilityDensity {
            targets,
            givens,
        })))
    }

    /// Parses what follows `SIMILARITY`.
    fn parse_similarity_tail(&mut self) -> PResult<Expr> {
        let to = if self.eat_keyword(Keyword::To) {
            self.expect(&TokenKind::LeftParen)?;
            let cond = self.parse_expression(0)?;
            self.expect(&TokenKind::RightParen)?;
            Some(Box::new(cond))
        } else {
            None
        };

        let context = if self.check_keyword(Keyword::In)
            && self.peek_second().as_keyword() == Some(Keyword::The)
        {
            self.advance();
            self.expect_keyword(Keyword::The)?;
            self.expect_keyword(Keyword::Context)?;
            self.expect_keyword(Keyword::Of)?;
            Some(self.expect_name()?)
        } else {
            None
        };

        Ok(Expr::Bql(Box::new(BqlFn::Similarity { to, context })))
    }

    fn parse_column_pair(&mut self) -> PResult<ColumnPair> {
        let mut pair = ColumnPair::default();
        if self.eat_keyword(Keyword::Of) {
            pair.of = Some(self.expect_name()?);
        }
        if self.eat_keyword(Keyword::With) {
            pair.with = Some(self.expect_name()?);
        }
        Ok(pair)
    }

    /// Parses `GIVEN (c = v, …)` when present.
    fn parse_optional_givens(&mut self) -> PResult<Vec<Constraint>> {
        if !self.eat_keyword(Keyword::Given) {
            return Ok(vec![]);
        }
        self.expect(&TokenKind::LeftParen)?;
        let list = self.parse_constraint_list_parenthesized_body()?;
        self.expect(&TokenKind::RightParen)?;
        Ok(list)
    }

    /// Parses `USING n SAMPLES` when present; `USING MODEL…` is left for
    /// the statement tail.
    fn parse_optional_samples(&mut self) -> PResult<Option<Box<Expr>>> {
        if !self.check_keyword(Keyword::Using)
            || matches!(
                self.peek_second().as_keyword(),
                Some(Keyword::Model | Keyword::Models)
            )
        {
            return Ok(None);
        }
        self.advance();
        let n = self.parse_expression(0)?;
        self.expect_keyword(Keyword::Samples)?;
        Ok(Some(Box::new(n)))
    }

    /// Parses `c = v, …` inside parentheses; values may use the full
    /// expression grammar.
    fn parse_constraint_list_parenthesized_body(&mut self) -> PResult<Vec<Constraint>> {
        let mut constraints = vec![self.parse_constraint(0)?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            constraints.push(self.parse_constraint(0)?);
        }
        Ok(constraints)
    }

    /// Parses `c = v, …` without surrounding parentheses; values stop
    /// below the comparison operators so the commas stay unambiguous.
    fn parse_constraint_list_bare(&mut self) -> PResult<Vec<Constraint>> {
        let mut constraints = vec![self.parse_constraint(7)?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            constraints.push(self.parse_constraint(7)?);
        }
        Ok(constraints)
    }

    fn parse_constraint(&mut self, value_bp: u8) -> PResult<Constraint> {
        let column = self.expect_name()?;
        self.expect(&TokenKind::Eq)?;
        let value = self.parse_expression(value_bp)?;
        Ok(Constraint { column, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(input: &str) -> Phrase {
        let mut parser = Parser::new(input);
        parser.parse_phrase().expect("parse").expect("phrase")
    }

    fn parse_query(input: &str) -> Query {
        match parse_one(input) {
            Phrase::Query(q) => q,
            other => panic!("expected query, got {other:?}"),
        }
    }

    fn parse_expr(input: &str) -> Expr {
        match parse_query(&format!("SELECT {input}")) {
            Query::Select(s) => s.columns.into_iter().next().unwrap().expr,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_empty_phrase() {
        assert_eq!(parse_one(";"), Phrase::Empty);
    }

    #[test]
    fn test_transactions() {
        assert_eq!(parse_one("BEGIN"), Phrase::Begin);
        assert_eq!(parse_one("BEGIN TRANSACTION;"), Phrase::Begin);
        assert_eq!(parse_one("COMMIT;"), Phrase::Commit);
        assert_eq!(parse_one("ROLLBACK;"), Phrase::Rollback);
    }

    #[test]
    fn test_select_passthrough() {
        let q = parse_query("SELECT a, b + 1 AS c FROM t WHERE a > 2 ORDER BY b DESC LIMIT 3");
        let Query::Select(s) = q else { panic!() };
        assert_eq!(s.columns.len(), 2);
        assert_eq!(s.columns[1].alias.as_deref(), Some("c"));
        assert!(s.where_clause.is_some());
        assert_eq!(s.order_by.len(), 1);
        assert_eq!(s.order_by[0].direction, OrderDirection::Desc);
        assert!(s.limit.is_some());
    }

    #[test]
    fn test_select_join() {
        let q = parse_query("SELECT * FROM t JOIN u ON t.id = u.id");
        let Query::Select(s) = q else { panic!() };
        assert!(matches!(s.from, Some(TableRef::Join { .. })));
    }

    #[test]
    fn test_estimate_row_context() {
        let q = parse_query("ESTIMATE a, PREDICTIVE PROBABILITY OF a AS pp FROM p");
        let Query::Estimate(e) = q else { panic!() };
        assert_eq!(e.from, EstimateFrom::Rows);
        assert_eq!(e.population, "p");
        assert_eq!(e.columns.len(), 2);
        assert_eq!(e.columns[1].alias.as_deref(), Some("pp"));
        assert!(matches!(
            &e.columns[1].expr,
            Expr::Bql(b) if matches!(&**b, BqlFn::PredictiveProbability { column, .. } if column == "a")
        ));
    }

    #[test]
    fn test_estimate_pairwise_variables() {
        let q = parse_query(
            "ESTIMATE DEPENDENCE PROBABILITY FROM PAIRWISE VARIABLES OF p FOR (a, b)",
        );
        let Query::Estimate(e) = q else { panic!() };
        assert_eq!(
            e.from,
            EstimateFrom::PairwiseVariables {
                subcols: vec![String::from("a"), String::from("b")]
            }
        );
        assert!(matches!(
            &e.columns[0].expr,
            Expr::Bql(b) if matches!(&**b, BqlFn::DependenceProbability { pair }
                if pair.of.is_none() && pair.with.is_none())
        ));
    }

    #[test]
    fn test_estimate_columns_synonym() {
        let q = parse_query("ESTIMATE * FROM COLUMNS OF p");
        let Query::Estimate(e) = q else { panic!() };
        assert_eq!(e.from, EstimateFrom::Variables);
    }

    #[test]
    fn test_estimate_modeled_by_and_models() {
        let q = parse_query("ESTIMATE a FROM p MODELED BY g USING MODELS 0-2, 5");
        let Query::Estimate(e) = q else { panic!() };
        assert_eq!(e.models.modeled_by.as_deref(), Some("g"));
        assert_eq!(
            e.models.models,
            Some(vec![
                ModelRange { lo: 0, hi: Some(2) },
                ModelRange { lo: 5, hi: None }
            ])
        );
    }

    #[test]
    fn test_probability_density() {
        let e = parse_expr("PROBABILITY DENSITY OF a = 2 GIVEN (b = 3)");
        let Expr::Bql(b) = e else { panic!() };
        let BqlFn::ProbabilityDensity { targets, givens } = *b else {
            panic!()
        };
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].column, "a");
        assert_eq!(givens.len(), 1);
    }

    #[test]
    fn test_probability_density_joint() {
        let e = parse_expr("PROBABILITY DENSITY OF (a = 1, b = 2)");
        let Expr::Bql(b) = e else { panic!() };
        let BqlFn::ProbabilityDensity { targets, .. } = *b else {
            panic!()
        };
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn test_probability_density_of_value() {
        let e = parse_expr("PROBABILITY DENSITY OF VALUE 5");
        assert!(matches!(
            e,
            Expr::Bql(b) if matches!(&*b, BqlFn::ProbabilityOfValue { .. })
        ));
    }

    #[test]
    fn test_similarity() {
        let e = parse_expr("SIMILARITY TO (rowid = 1) IN THE CONTEXT OF a");
        let Expr::Bql(b) = e else { panic!() };
        let BqlFn::Similarity { to, context } = *b else { panic!() };
        assert!(to.is_some());
        assert_eq!(context.as_deref(), Some("a"));
    }

    #[test]
    fn test_mutual_information_samples() {
        let e = parse_expr("MUTUAL INFORMATION OF a WITH b USING 100 SAMPLES");
        let Expr::Bql(b) = e else { panic!() };
        let BqlFn::MutualInformation { pair, samples, .. } = *b else {
            panic!()
        };
        assert_eq!(pair.of.as_deref(), Some("a"));
        assert_eq!(pair.with.as_deref(), Some("b"));
        assert!(samples.is_some());
    }

    #[test]
    fn test_correlation_pvalue() {
        let e = parse_expr("CORRELATION PVALUE OF a WITH b");
        assert!(matches!(
            e,
            Expr::Bql(b) if matches!(&*b, BqlFn::Correlation { pvalue: true, .. })
        ));
    }

    #[test]
    fn test_bql_keyword_fallback_to_name() {
        // "probability" alone is just a column.
        let e = parse_expr("probability + 1");
        assert!(matches!(
            e,
            Expr::Binary { left, .. } if matches!(&*left, Expr::Column { name, .. } if name == "probability")
        ));
    }

    #[test]
    fn test_infer_implicit() {
        let q = parse_query("INFER a, b WITH CONFIDENCE 0.9 FROM p WHERE a IS NULL");
        let Query::Infer(i) = q else { panic!() };
        assert!(!i.explicit);
        assert_eq!(i.targets.len(), 2);
        assert!(i.confidence.is_some());
    }

    #[test]
    fn test_infer_explicit_predict() {
        let q = parse_query("INFER EXPLICIT a, PREDICT b AS bp CONFIDENCE bc FROM p");
        let Query::Infer(i) = q else { panic!() };
        assert!(i.explicit);
        assert!(matches!(
            &i.targets[1],
            InferTarget::Predict { column, alias, confidence, .. }
                if column == "b" && alias.as_deref() == Some("bp") && confidence == "bc"
        ));
    }

    #[test]
    fn test_simulate() {
        let q = parse_query("SIMULATE a, b FROM p GIVEN c = 3 LIMIT 5");
        let Query::Simulate(s) = q else { panic!() };
        assert_eq!(s.columns, vec![String::from("a"), String::from("b")]);
        assert_eq!(s.givens.len(), 1);
        assert!(matches!(s.limit, Expr::Literal(Literal::Integer(5))));
    }

    #[test]
    fn test_create_population() {
        let p = parse_one(
            "CREATE POPULATION p FOR t WITH SCHEMA (MODEL a, b AS numerical; IGNORE c)",
        );
        let Phrase::CreatePopulation(cp) = p else { panic!() };
        assert_eq!(cp.name, "p");
        assert_eq!(cp.table, "t");
        assert_eq!(cp.clauses.len(), 2);
        assert_eq!(
            cp.clauses[0],
            PopulationClause::Model {
                columns: vec![String::from("a"), String::from("b")],
                stattype: String::from("numerical"),
            }
        );
    }

    #[test]
    fn test_create_generator() {
        let p = parse_one("CREATE GENERATOR g FOR p USING diag_gauss()");
        let Phrase::CreateGenerator(cg) = p else { panic!() };
        assert_eq!(cg.backend, "diag_gauss");
        assert_eq!(cg.schema, "");
    }

    #[test]
    fn test_create_generator_schema_blob() {
        let p = parse_one("CREATE GENERATOR g FOR p USING crosscat(SUBSAMPLE(100), DEPENDENT(a, b))");
        let Phrase::CreateGenerator(cg) = p else { panic!() };
        assert_eq!(cg.schema, "SUBSAMPLE(100), DEPENDENT(a, b)");
    }

    #[test]
    fn test_initialize() {
        let p = parse_one("INITIALIZE 10 MODELS FOR g");
        let Phrase::Initialize(i) = p else { panic!() };
        assert_eq!(i.n_models, 10);
        assert_eq!(i.generator, "g");
    }

    #[test]
    fn test_analyze() {
        let p = parse_one("ANALYZE g MODELS 0-3 FOR 10 ITERATIONS CHECKPOINT 2 ITERATIONS");
        let Phrase::Analyze(a) = p else { panic!() };
        assert_eq!(a.generator, "g");
        assert_eq!(a.models, Some(vec![ModelRange { lo: 0, hi: Some(3) }]));
        assert_eq!(a.budget.amount, 10);
        assert_eq!(a.budget.unit, TimeUnit::Iterations);
        assert_eq!(a.checkpoint.unwrap().amount, 2);
    }

    #[test]
    fn test_drop_models() {
        let p = parse_one("DROP MODELS 0-4 FROM g");
        let Phrase::DropModels(d) = p else { panic!() };
        assert_eq!(d.models, Some(vec![ModelRange { lo: 0, hi: Some(4) }]));
    }

    #[test]
    fn test_drop_population() {
        let p = parse_one("DROP POPULATION IF EXISTS p");
        assert_eq!(
            p,
            Phrase::DropPopulation {
                if_exists: true,
                name: String::from("p")
            }
        );
    }

    #[test]
    fn test_alter_table_rename() {
        let p = parse_one("ALTER TABLE t RENAME TO u");
        assert_eq!(
            p,
            Phrase::AlterTable {
                table: String::from("t"),
                commands: vec![AlterTableCmd::RenameTo(String::from("u"))],
            }
        );
    }

    #[test]
    fn test_create_table_as() {
        let p = parse_one("CREATE TEMP TABLE t AS SIMULATE a FROM p LIMIT 3");
        let Phrase::CreateTableAs { temp, query, .. } = p else {
            panic!()
        };
        assert!(temp);
        assert!(matches!(*query, Query::Simulate(_)));
    }

    #[test]
    fn test_parameters() {
        let mut parser = Parser::new("SELECT ? , ?2, :x, :x, @y FROM t");
        parser.parse_phrase().unwrap().unwrap();
        let params = parser.params();
        // ?=1, ?2=2, :x=3 (shared), @y=4
        assert_eq!(params.len(), 4);
        assert_eq!(
            params.named_params(),
            &[(String::from(":x"), 3), (String::from("@y"), 4)]
        );
    }

    #[test]
    fn test_error_and_recovery() {
        let mut parser = Parser::new("SELECT FROM;; SELECT 1;");
        assert!(parser.parse_phrase().is_err());
        parser.skip_to_next_phrase();
        assert_eq!(parser.parse_phrase().unwrap(), Some(Phrase::Empty));
        assert!(matches!(
            parser.parse_phrase().unwrap(),
            Some(Phrase::Query(_))
        ));
        assert_eq!(parser.parse_phrase().unwrap(), None);
    }

    #[test]
    fn test_lexical_error_surfaces() {
        let mut parser = Parser::new("SELECT 'oops");
        let err = parser.parse_phrase().unwrap_err();
        assert!(matches!(err, SyntaxError::Lexical(_)));
    }

    #[test]
    fn test_multiple_phrases() {
        let phrases = Parser::parse("SELECT 1; ESTIMATE a FROM p;").unwrap();
        assert_eq!(phrases.len(), 2);
    }
}
